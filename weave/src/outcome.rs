//! 延迟结果的构造与解析

use crate::error::InterceptError;
use crate::invocation::{value, InvocationResult, Outcome, Value};
use crate::method::MethodId;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use tokio::task::JoinHandle;

/// 已就绪的结果
pub fn ready(result: InvocationResult) -> Outcome {
    futures::future::ready(result).boxed()
}

/// 尚未完成的结果
pub fn deferred<F, T>(future: F) -> Outcome
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Any + Send,
{
    future.map(|result| result.map(value)).boxed()
}

/// 由后台任务给出的结果
///
/// 任务被取消时得到 `Cancelled`，任务 panic 时 panic 继续向调用方传播。
/// 终点调用把工作交给 tokio 任务时使用：
///
/// ```ignore
/// let terminal = weave::terminal(move |arguments| {
///     let repository = repository.clone();
///     let sku = arguments.get::<String>(0).cloned().unwrap_or_default();
///     weave::spawned(<dyn OrderApi>::PLACE, tokio::spawn(async move { repository.insert(sku).await }))
/// });
/// ```
pub fn spawned<T>(method: MethodId, handle: JoinHandle<anyhow::Result<T>>) -> Outcome
where
    T: Any + Send,
{
    async move {
        match handle.await {
            Ok(result) => result.map(value),
            Err(e) if e.is_cancelled() => Err(InterceptError::Cancelled {
                method: method.to_string(),
            }
            .into()),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
    .boxed()
}

/// 立即解析同步调用的结果
///
/// 拦截链中某一环挂起时返回 `SuspendedSyncCall`，不会阻塞当前线程。
pub fn resolve_now(method: &MethodId, outcome: Outcome) -> InvocationResult {
    match outcome.now_or_never() {
        Some(result) => result,
        None => {
            tracing::error!(method = %method, "Synchronous interceptor chain suspended");
            Err(InterceptError::SuspendedSyncCall {
                method: method.to_string(),
            }
            .into())
        }
    }
}

/// 取回具体类型的返回值
pub fn downcast_value<T: Any>(method: &MethodId, value: Value) -> anyhow::Result<T> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        InterceptError::ReturnTypeMismatch {
            method: method.to_string(),
            expected: std::any::type_name::<T>(),
        }
        .into()
    })
}
