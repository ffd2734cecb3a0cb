//! Weave 过程宏
//!
//! - `#[interceptable]` - 标记能力接口，生成方法标识常量与转发代理
//! - `#[intercepted]` - 标记组件对接口的实现，登记拦截声明与接口暴露

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemImpl, ItemTrait};

mod intercepted;
mod interceptable;
mod utils;

/// `#[interceptable]` 属性宏
///
/// 标记一个能力接口。接口必须以 `Send + Sync` 为父 trait，
/// 方法接收 `&self`、参数为拥有所有权且可克隆的值、返回 `anyhow::Result<T>`。
/// 异步方法需要同时使用 `#[async_trait]`，并写在 `#[interceptable]` 下方。
///
/// 使用示例：
/// ```ignore
/// use weave::prelude::*;
///
/// #[interceptable]
/// #[async_trait]
/// pub trait OrderApi: Send + Sync {
///     async fn place(&self, sku: String, quantity: u32) -> anyhow::Result<u64>;
///     fn cancel(&self, order_id: u64) -> anyhow::Result<()>;
/// }
///
/// // 生成的方法标识
/// let id = <dyn OrderApi>::PLACE;
/// ```
#[proc_macro_attribute]
pub fn interceptable(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[interceptable] takes no arguments",
        )
        .to_compile_error()
        .into();
    }
    let item = parse_macro_input!(item as ItemTrait);
    interceptable::impl_interceptable(item)
        .unwrap_or_else(utils::to_compile_error)
        .into()
}

/// `#[intercepted]` 属性宏
///
/// 放在 `impl Trait for Component` 上，读取其中的拦截声明：
///
/// - impl 上的 `#[intercept(Kind, priority = N, config(...))]` - 类级别声明
/// - 方法上的 `#[intercept(...)]` - 方法级别声明，覆盖同类型的类级别声明
/// - 方法上的 `#[ignore_interception(Kind, ...)]` - 该方法不应用这些类级别声明
///
/// 声明和接口暴露在编译期提交，`Weaver` 启动时自动加载。
///
/// 使用示例：
/// ```ignore
/// #[intercepted]
/// #[intercept(LoggingInterceptor)]
/// #[async_trait]
/// impl OrderApi for OrderService {
///     #[intercept(RetryInterceptor, priority = 5, config(3, 20))]
///     async fn place(&self, sku: String, quantity: u32) -> anyhow::Result<u64> {
///         self.repository.insert(sku, quantity).await
///     }
///
///     #[ignore_interception(LoggingInterceptor)]
///     fn cancel(&self, order_id: u64) -> anyhow::Result<()> {
///         self.repository.remove(order_id)
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn intercepted(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[intercepted] takes no arguments; use #[intercept(...)] on the impl",
        )
        .to_compile_error()
        .into();
    }
    let item = parse_macro_input!(item as ItemImpl);
    intercepted::impl_intercepted(item)
        .unwrap_or_else(utils::to_compile_error)
        .into()
}
