//! 工具函数

use proc_macro2::{Span, TokenStream};
use quote::ToTokens;
use syn::{GenericArgument, Ident, PathArguments, ReturnType, Type};

/// 去掉原始标识符前缀 `r#`
pub fn plain_name(ident: &Ident) -> String {
    let name = ident.to_string();
    name.strip_prefix("r#").map(str::to_string).unwrap_or(name)
}

/// 方法名常量：`place_order` -> `PLACE_ORDER`
pub fn const_ident(ident: &Ident) -> Ident {
    Ident::new(&plain_name(ident).to_uppercase(), ident.span())
}

/// 拼接出全局唯一的隐藏标识
pub fn hidden_ident(prefix: &str, parts: &[&str]) -> Ident {
    let mut name = prefix.to_string();
    for part in parts {
        name.push('_');
        name.push_str(&part.to_uppercase());
    }
    Ident::new(&name, Span::call_site())
}

/// 去掉空白的类型文本，用于方法签名
pub fn compact(tokens: &impl ToTokens) -> String {
    tokens
        .to_token_stream()
        .to_string()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// 方法签名文本：`(u64,String)->anyhow::Result<Receipt>`
pub fn signature_text(arguments: &[&Type], output: &ReturnType) -> String {
    let arguments: Vec<String> = arguments.iter().map(|ty| compact(ty)).collect();
    let output = match output {
        ReturnType::Default => "()".to_string(),
        ReturnType::Type(_, ty) => compact(ty),
    };
    format!("({})->{}", arguments.join(","), output)
}

/// 取出 `Result<T>` / `anyhow::Result<T>` 中的 `T`
///
/// 拦截链以 `anyhow::Error` 传递错误，只接受单参数的 `Result` 别名。
pub fn result_inner_type(output: &ReturnType) -> syn::Result<Type> {
    let ty = match output {
        ReturnType::Type(_, ty) => ty.as_ref(),
        ReturnType::Default => {
            return Err(syn::Error::new(
                Span::call_site(),
                "interceptable methods must return anyhow::Result<T>",
            ))
        }
    };

    let not_result = || syn::Error::new_spanned(ty, "interceptable methods must return anyhow::Result<T>");
    let Type::Path(path) = ty else {
        return Err(not_result());
    };
    let segment = path.path.segments.last().ok_or_else(not_result)?;
    if segment.ident != "Result" {
        return Err(not_result());
    }
    let PathArguments::AngleBracketed(generics) = &segment.arguments else {
        return Err(not_result());
    };
    if generics.args.len() != 1 {
        return Err(syn::Error::new_spanned(
            ty,
            "the error type of an interceptable method must be anyhow::Error; use anyhow::Result<T>",
        ));
    }
    match generics.args.first() {
        Some(GenericArgument::Type(inner)) => Ok(inner.clone()),
        _ => Err(not_result()),
    }
}

/// 合并多个错误，一次报告给用户
pub fn combine(errors: Vec<syn::Error>) -> Option<syn::Error> {
    errors.into_iter().reduce(|mut all, next| {
        all.combine(next);
        all
    })
}

/// 转为编译错误
pub fn to_compile_error(err: syn::Error) -> TokenStream {
    err.to_compile_error()
}
