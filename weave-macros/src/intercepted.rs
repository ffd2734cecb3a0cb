//! `#[intercepted]` 实现
//!
//! 读取 `impl Trait for Component` 上的 `#[intercept(...)]` 和方法上的
//! `#[intercept(...)]` / `#[ignore_interception(...)]`，生成编译期注册记录：
//! 拦截声明提交到 `DeclarationSubmission`，接口暴露提交到 `InterfaceSubmission`。

use crate::utils;
use proc_macro2::TokenStream;
use quote::{quote, ToTokens};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, ImplItem, ItemImpl, Lit, LitInt, Path, Token, Type, UnOp};

/// 配置键的一个分量
enum ConfigValue {
    Int(LitInt, bool),
    Bool(bool),
    Str(syn::LitStr),
}

impl Parse for ConfigValue {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let expr: syn::Expr = input.parse()?;
        match expr {
            syn::Expr::Lit(lit) => match lit.lit {
                Lit::Int(value) => Ok(ConfigValue::Int(value, false)),
                Lit::Bool(value) => Ok(ConfigValue::Bool(value.value)),
                Lit::Str(value) => Ok(ConfigValue::Str(value)),
                other => Err(syn::Error::new_spanned(
                    other,
                    "config values must be integer, bool or string literals",
                )),
            },
            syn::Expr::Unary(unary) if matches!(unary.op, UnOp::Neg(_)) => match *unary.expr {
                syn::Expr::Lit(syn::ExprLit {
                    lit: Lit::Int(value),
                    ..
                }) => Ok(ConfigValue::Int(value, true)),
                other => Err(syn::Error::new_spanned(other, "expected an integer literal")),
            },
            other => Err(syn::Error::new_spanned(
                other,
                "config values must be integer, bool or string literals",
            )),
        }
    }
}

impl ToTokens for ConfigValue {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let component = match self {
            ConfigValue::Int(value, negative) => {
                let sign = negative.then(|| quote!(-));
                quote!(::weave::ConfigComponent::Int(#sign #value))
            }
            ConfigValue::Bool(value) => quote!(::weave::ConfigComponent::Bool(#value)),
            ConfigValue::Str(value) => {
                quote!(::weave::ConfigComponent::Str(::std::borrow::Cow::Borrowed(#value)))
            }
        };
        tokens.extend(component);
    }
}

/// `#[intercept(Kind, priority = N, config(...))]`
struct InterceptArgs {
    kind: Path,
    priority: Option<(LitInt, bool)>,
    config: Vec<ConfigValue>,
}

impl Parse for InterceptArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let kind: Path = input.parse()?;
        let mut priority = None;
        let mut config = None;

        while !input.is_empty() {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }
            let key: syn::Ident = input.parse()?;
            if key == "priority" {
                if priority.is_some() {
                    return Err(syn::Error::new_spanned(key, "duplicate `priority`"));
                }
                input.parse::<Token![=]>()?;
                let negative = input.parse::<Option<Token![-]>>()?.is_some();
                priority = Some((input.parse::<LitInt>()?, negative));
            } else if key == "config" {
                if config.is_some() {
                    return Err(syn::Error::new_spanned(key, "duplicate `config`"));
                }
                let content;
                syn::parenthesized!(content in input);
                let values = Punctuated::<ConfigValue, Token![,]>::parse_terminated(&content)?;
                config = Some(values.into_iter().collect());
            } else {
                return Err(syn::Error::new_spanned(
                    key,
                    "expected `priority = <int>` or `config(...)`",
                ));
            }
        }

        Ok(Self {
            kind,
            priority,
            config: config.unwrap_or_default(),
        })
    }
}

impl InterceptArgs {
    fn submitted(&self, method: TokenStream) -> TokenStream {
        let kind = &self.kind;
        let priority = match &self.priority {
            Some((value, negative)) => {
                let sign = negative.then(|| quote!(-));
                quote!(::std::option::Option::Some(#sign #value))
            }
            None => quote!(::std::option::Option::None),
        };
        let config = &self.config;
        quote! {
            ::weave::SubmittedDeclaration::Intercept {
                method: #method,
                kind: ::weave::InterceptorKind::of::<#kind>,
                priority: #priority,
                config: &[#(#config),*],
            }
        }
    }
}

/// 取出并移除名为 `name` 的属性
fn take_attrs(attrs: &mut Vec<Attribute>, name: &str) -> Vec<Attribute> {
    let (taken, kept): (Vec<_>, Vec<_>) =
        attrs.drain(..).partition(|attr| attr.path().is_ident(name));
    *attrs = kept;
    taken
}

fn last_ident(ty: &Type) -> syn::Result<String> {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| utils::plain_name(&segment.ident))
            .ok_or_else(|| syn::Error::new_spanned(ty, "expected a type path")),
        _ => Err(syn::Error::new_spanned(ty, "expected a type path")),
    }
}

/// 实现 `#[intercepted]`
pub fn impl_intercepted(mut item: ItemImpl) -> syn::Result<TokenStream> {
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item.generics,
            "#[intercepted] does not support generic impls",
        ));
    }
    let interface = match &item.trait_ {
        Some((None, path, _)) => path.clone(),
        _ => {
            return Err(syn::Error::new_spanned(
                &item.self_ty,
                "#[intercepted] must be placed on `impl Trait for Component`",
            ))
        }
    };
    let component = item.self_ty.as_ref().clone();

    let mut entries = Vec::new();
    for attr in take_attrs(&mut item.attrs, "intercept") {
        let args: InterceptArgs = attr.parse_args()?;
        entries.push(args.submitted(quote!(::std::option::Option::None)));
    }

    for impl_item in item.items.iter_mut() {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        let const_name = utils::const_ident(&method.sig.ident);
        let method_id = quote!(<dyn #interface>::#const_name);

        for attr in take_attrs(&mut method.attrs, "intercept") {
            let args: InterceptArgs = attr.parse_args()?;
            entries.push(args.submitted(quote!(::std::option::Option::Some(#method_id))));
        }
        for attr in take_attrs(&mut method.attrs, "ignore_interception") {
            let kinds = attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated)?;
            if kinds.is_empty() {
                return Err(syn::Error::new_spanned(
                    attr,
                    "#[ignore_interception] needs at least one interceptor type",
                ));
            }
            for kind in kinds {
                entries.push(quote! {
                    ::weave::SubmittedDeclaration::Ignore {
                        method: #method_id,
                        kind: ::weave::InterceptorKind::of::<#kind>,
                    }
                });
            }
        }
    }

    let component_name = last_ident(&component)?;
    let interface_name = interface
        .segments
        .last()
        .map(|segment| utils::plain_name(&segment.ident))
        .unwrap_or_default();
    let registry = utils::hidden_ident("__WEAVE_INTERCEPTED", &[&component_name, &interface_name]);

    let declarations = (!entries.is_empty()).then(|| {
        quote! {
            static DECLARATIONS: &[::weave::SubmittedDeclaration] = &[#(#entries),*];

            ::weave::inventory::submit! {
                ::weave::DeclarationSubmission::new(::weave::TypeKey::of::<#component>, DECLARATIONS)
            }
        }
    });

    Ok(quote! {
        #item

        #[doc(hidden)]
        #[allow(non_upper_case_globals)]
        const #registry: () = {
            #declarations

            fn expose() -> ::weave::ExposedInterface {
                ::weave::ExposedInterface::new::<#component, dyn #interface>(|component| component)
            }

            ::weave::inventory::submit! {
                ::weave::InterfaceSubmission::new(::weave::TypeKey::of::<#component>, expose)
            }
        };
    })
}
