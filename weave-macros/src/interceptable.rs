//! `#[interceptable]` 实现
//!
//! 为能力接口生成：
//! - 每个方法的 `MethodId` 常量（挂在 `impl dyn Trait` 上）
//! - 把调用交给 `Dispatcher` 的转发代理
//! - `CapabilityInterface` 实现

use crate::utils;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{
    Attribute, FnArg, Ident, ItemTrait, Pat, PatIdent, PatType, Signature, TraitItem, TraitItemFn,
    Type,
};

/// 解析后的接口方法
struct InterfaceMethod<'a> {
    sig: &'a Signature,
    const_name: Ident,
    signature: String,
    arguments: Vec<(Ident, &'a Type)>,
    output: Type,
}

impl<'a> InterfaceMethod<'a> {
    fn parse(method: &'a TraitItemFn, async_support: bool) -> syn::Result<Self> {
        let sig = &method.sig;

        if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
            return Err(syn::Error::new_spanned(
                &sig.generics,
                "interceptable methods cannot be generic",
            ));
        }
        if sig.asyncness.is_some() && !async_support {
            return Err(syn::Error::new_spanned(
                sig,
                "async methods require #[async_trait] below #[interceptable]",
            ));
        }

        let mut inputs = sig.inputs.iter();
        match inputs.next() {
            Some(FnArg::Receiver(receiver))
                if receiver.reference.is_some() && receiver.mutability.is_none() => {}
            _ => {
                return Err(syn::Error::new_spanned(
                    sig,
                    "interceptable methods must take &self",
                ))
            }
        }

        let mut arguments = Vec::new();
        for (index, input) in inputs.enumerate() {
            let FnArg::Typed(PatType { ty, .. }) = input else {
                continue;
            };
            match ty.as_ref() {
                Type::Reference(_) => {
                    return Err(syn::Error::new_spanned(
                        ty,
                        "interceptable method arguments must be owned values",
                    ))
                }
                Type::ImplTrait(_) => {
                    return Err(syn::Error::new_spanned(
                        ty,
                        "interceptable methods cannot be generic",
                    ))
                }
                _ => {}
            }
            arguments.push((format_ident!("arg{}", index), ty.as_ref()));
        }

        let output = utils::result_inner_type(&sig.output)?;
        let types: Vec<&Type> = arguments.iter().map(|(_, ty)| *ty).collect();

        Ok(Self {
            sig,
            const_name: utils::const_ident(&sig.ident),
            signature: utils::signature_text(&types, &sig.output),
            arguments,
            output,
        })
    }

    /// 代理方法签名：参数改为统一命名
    fn proxy_signature(&self) -> Signature {
        let mut sig = self.sig.clone();
        let mut names = self.arguments.iter().map(|(name, _)| name.clone());
        for input in sig.inputs.iter_mut() {
            if let FnArg::Typed(pat_type) = input {
                if let Some(name) = names.next() {
                    pat_type.attrs.clear();
                    pat_type.pat = Box::new(Pat::Ident(PatIdent {
                        attrs: Vec::new(),
                        by_ref: None,
                        mutability: None,
                        ident: name,
                        subpat: None,
                    }));
                }
            }
        }
        sig
    }

    fn proxy_method(&self, interface: &Ident) -> TokenStream {
        let sig = self.proxy_signature();
        let method = &self.sig.ident;
        let const_name = &self.const_name;
        let output = &self.output;
        let names: Vec<&Ident> = self.arguments.iter().map(|(name, _)| name).collect();
        let extracts = self.arguments.iter().enumerate().map(|(index, (name, ty))| {
            quote! {
                let #name = arguments.extract::<#ty>(&<dyn #interface>::#const_name, #index)?;
            }
        });

        if self.sig.asyncness.is_some() {
            quote! {
                #sig {
                    if !self.dispatcher.intercepts(&<dyn #interface>::#const_name) {
                        return self.target.#method(#(#names),*).await;
                    }
                    let arguments = ::weave::Arguments::new()#(.with(#names))*;
                    let target = self.target.clone();
                    let terminal = ::weave::async_terminal(
                        move |arguments: ::std::sync::Arc<::weave::Arguments>| {
                            let target = target.clone();
                            async move {
                                #(#extracts)*
                                target.#method(#(#names),*).await
                            }
                        },
                    );
                    self.dispatcher
                        .call::<#output>(<dyn #interface>::#const_name, arguments, terminal)
                        .await
                }
            }
        } else {
            quote! {
                #sig {
                    if !self.dispatcher.intercepts(&<dyn #interface>::#const_name) {
                        return self.target.#method(#(#names),*);
                    }
                    let arguments = ::weave::Arguments::new()#(.with(#names))*;
                    let target = self.target.clone();
                    let terminal = ::weave::sync_terminal(move |arguments: &::weave::Arguments| {
                        #(#extracts)*
                        target.#method(#(#names),*).map(::weave::value)
                    });
                    self.dispatcher
                        .call_sync::<#output>(<dyn #interface>::#const_name, arguments, terminal)
                }
            }
        }
    }
}

fn is_async_trait(attr: &Attribute) -> bool {
    attr.path()
        .segments
        .last()
        .is_some_and(|segment| segment.ident == "async_trait")
}

/// 实现 `#[interceptable]`
pub fn impl_interceptable(item: ItemTrait) -> syn::Result<TokenStream> {
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item.generics,
            "#[interceptable] does not support generic traits",
        ));
    }

    let async_attr = item.attrs.iter().find(|attr| is_async_trait(attr));
    let mut methods = Vec::new();
    let mut errors = Vec::new();
    for trait_item in &item.items {
        if let TraitItem::Fn(method) = trait_item {
            match InterfaceMethod::parse(method, async_attr.is_some()) {
                Ok(parsed) => methods.push(parsed),
                Err(err) => errors.push(err),
            }
        }
    }
    if let Some(err) = utils::combine(errors) {
        return Err(err);
    }

    let interface = &item.ident;
    let vis = &item.vis;
    let interface_name = interface.to_string();
    let proxy = format_ident!("{}Proxy", interface);

    let consts = methods.iter().map(|method| {
        let const_name = &method.const_name;
        let name = utils::plain_name(&method.sig.ident);
        let signature = &method.signature;
        let doc = format!("`{}{}` 的方法标识", name, signature);
        quote! {
            #[doc = #doc]
            pub const #const_name: ::weave::MethodId = ::weave::MethodId::new(#name, #signature);
        }
    });
    let const_names: Vec<&Ident> = methods.iter().map(|method| &method.const_name).collect();
    let proxy_methods = methods.iter().map(|method| method.proxy_method(interface));
    // 代理实现沿用接口上的 async_trait 参数（例如 `?Send`）
    let proxy_attr = async_attr.map(|attr| quote!(#attr));

    Ok(quote! {
        #item

        impl dyn #interface {
            #(#consts)*
        }

        #[doc(hidden)]
        #vis struct #proxy {
            target: ::std::sync::Arc<dyn #interface>,
            dispatcher: ::weave::Dispatcher,
        }

        #proxy_attr
        impl #interface for #proxy {
            #(#proxy_methods)*
        }

        impl ::weave::CapabilityInterface for dyn #interface {
            fn interface_name() -> &'static str {
                #interface_name
            }

            fn methods() -> &'static [::weave::MethodId] {
                static METHODS: &[::weave::MethodId] = &[#(<dyn #interface>::#const_names),*];
                METHODS
            }

            fn wrap(
                target: ::std::sync::Arc<Self>,
                dispatcher: ::weave::Dispatcher,
            ) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new(#proxy { target, dispatcher })
            }
        }
    })
}
