//! 拦截链执行器
//!
//! 按优先级顺序组织拦截器，形成洋葱式的嵌套调用：
//! 前置逻辑按 1..n 执行，目标方法在最内层，后置逻辑按 n..1 执行。

use crate::interceptor::SharedInterceptor;
use crate::invocation::{Arguments, ChainState, InvocationResult, Outcome, Terminal};
use crate::method::{MethodId, TypeKey};
use crate::outcome;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// 由闭包构造终点调用
pub fn terminal<F>(call: F) -> Terminal
where
    F: Fn(Arc<Arguments>) -> Outcome + Send + Sync + 'static,
{
    Arc::new(call)
}

/// 由同步闭包构造终点调用
pub fn sync_terminal<F>(call: F) -> Terminal
where
    F: Fn(&Arguments) -> InvocationResult + Send + Sync + 'static,
{
    Arc::new(move |arguments: Arc<Arguments>| outcome::ready(call(&arguments)))
}

/// 由异步闭包构造终点调用
pub fn async_terminal<F, Fut, T>(call: F) -> Terminal
where
    F: Fn(Arc<Arguments>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Any + Send,
{
    Arc::new(move |arguments: Arc<Arguments>| outcome::deferred(call(arguments)))
}

/// 拦截器链
///
/// 创建后不可变，可在多个调用之间并发共享。
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[SharedInterceptor]>,
}

impl InterceptorChain {
    /// 创建拦截器链（顺序即执行顺序）
    pub fn new(interceptors: Vec<SharedInterceptor>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 拦截器名称（按执行顺序）
    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// 执行拦截链
    ///
    /// 空链直接调用终点。返回的 future 被丢弃时，尚未执行的环节不再执行。
    pub fn invoke(
        &self,
        target_type: TypeKey,
        method: MethodId,
        arguments: Arguments,
        terminal: Terminal,
    ) -> Outcome {
        let arguments = Arc::new(arguments);
        if self.interceptors.is_empty() {
            return terminal(arguments);
        }

        tracing::trace!(
            component = %target_type,
            method = %method,
            interceptors = self.interceptors.len(),
            "Entering interceptor chain"
        );

        let state = Arc::new(ChainState {
            target_type,
            method,
            interceptors: self.interceptors.clone(),
            terminal,
            started: Instant::now(),
        });
        ChainState::run(state, 0, arguments)
    }

    /// 执行同步方法的拦截链
    ///
    /// 链中每一环都必须同步完成，否则返回 `SuspendedSyncCall`。
    pub fn invoke_sync(
        &self,
        target_type: TypeKey,
        method: MethodId,
        arguments: Arguments,
        terminal: Terminal,
    ) -> InvocationResult {
        let outcome = self.invoke(target_type, method.clone(), arguments, terminal);
        outcome::resolve_now(&method, outcome)
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InterceptError;
    use crate::interceptor::Interceptor;
    use crate::invocation::{value, Invocation};
    use crate::outcome::downcast_value;
    use async_trait::async_trait;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::task::Context;

    struct OrderService;

    const PLACE: MethodId = MethodId::new("place", "(u32)->anyhow::Result<u64>");

    #[derive(Debug)]
    struct OutOfStock(u32);

    impl std::fmt::Display for OutOfStock {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "sku {} out of stock", self.0)
        }
    }

    impl std::error::Error for OutOfStock {}

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        id: usize,
        log: Log,
    }

    #[async_trait]
    impl Interceptor for Recording {
        async fn intercept(&self, invocation: Invocation) -> InvocationResult {
            self.log.lock().push(format!("pre{}", self.id));
            let result = invocation.proceed().await;
            self.log.lock().push(format!("post{}", self.id));
            result
        }
    }

    /// 后置逻辑记录下游错误
    struct ErrorRecording {
        log: Log,
    }

    #[async_trait]
    impl Interceptor for ErrorRecording {
        async fn intercept(&self, invocation: Invocation) -> InvocationResult {
            self.log.lock().push("pre".to_string());
            let result = invocation.proceed().await;
            match &result {
                Ok(_) => self.log.lock().push("post:ok".to_string()),
                Err(e) => self.log.lock().push(format!("post:{}", e)),
            }
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor for ShortCircuit {
        async fn intercept(&self, _invocation: Invocation) -> InvocationResult {
            Ok(value(0u64))
        }
    }

    struct Recover;

    #[async_trait]
    impl Interceptor for Recover {
        async fn intercept(&self, invocation: Invocation) -> InvocationResult {
            match invocation.proceed().await {
                Err(e) if e.downcast_ref::<OutOfStock>().is_some() => Ok(value(99u64)),
                other => other,
            }
        }
    }

    struct Doubling;

    #[async_trait]
    impl Interceptor for Doubling {
        async fn intercept(&self, invocation: Invocation) -> InvocationResult {
            let quantity = invocation.argument::<u32>(0).copied().unwrap_or_default();
            invocation
                .proceed_with(Arguments::new().with(quantity * 2))
                .await
        }
    }

    fn recording(count: usize, log: &Log) -> Vec<SharedInterceptor> {
        (1..=count)
            .map(|id| {
                Arc::new(Recording {
                    id,
                    log: log.clone(),
                }) as SharedInterceptor
            })
            .collect()
    }

    fn logging_terminal(log: &Log) -> Terminal {
        let log = log.clone();
        sync_terminal(move |arguments| {
            log.lock().push("T".to_string());
            let quantity = arguments.extract::<u32>(&PLACE, 0)?;
            Ok(value(u64::from(quantity) * 10))
        })
    }

    fn failing_terminal() -> Terminal {
        sync_terminal(|arguments| {
            let sku = arguments.extract::<u32>(&PLACE, 0)?;
            Err(OutOfStock(sku).into())
        })
    }

    fn invoke(chain: &InterceptorChain, quantity: u32, terminal: Terminal) -> Outcome {
        chain.invoke(
            TypeKey::of::<OrderService>(),
            PLACE,
            Arguments::new().with(quantity),
            terminal,
        )
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(recording(3, &log));

        let result = invoke(&chain, 2, logging_terminal(&log)).await.unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 20);
        assert_eq!(
            *log.lock(),
            vec!["pre1", "pre2", "pre3", "T", "post3", "post2", "post1"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_calls_terminal() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::empty();

        let result = invoke(&chain, 1, logging_terminal(&log)).await.unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 10);
        assert_eq!(*log.lock(), vec!["T"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_layers() {
        let log: Log = Arc::default();
        let interceptors: Vec<SharedInterceptor> = vec![
            Arc::new(Recording {
                id: 1,
                log: log.clone(),
            }),
            Arc::new(ShortCircuit),
            Arc::new(Recording {
                id: 3,
                log: log.clone(),
            }),
        ];
        let chain = InterceptorChain::new(interceptors);

        let result = invoke(&chain, 2, logging_terminal(&log)).await.unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 0);
        assert_eq!(*log.lock(), vec!["pre1", "post1"]);
    }

    #[tokio::test]
    async fn test_terminal_error_propagates_verbatim() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(recording(2, &log));

        let err = invoke(&chain, 4, failing_terminal()).await.unwrap_err();

        assert_eq!(err.downcast_ref::<OutOfStock>().map(|e| e.0), Some(4));
        assert_eq!(*log.lock(), vec!["pre1", "pre2", "post2", "post1"]);
    }

    #[tokio::test]
    async fn test_enclosing_interceptor_replaces_error() {
        let log: Log = Arc::default();
        let mut interceptors: Vec<SharedInterceptor> = vec![Arc::new(Recover)];
        interceptors.extend(recording(1, &log));
        let chain = InterceptorChain::new(interceptors);

        let result = invoke(&chain, 4, failing_terminal()).await.unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 99);
        assert_eq!(*log.lock(), vec!["pre1", "post1"]);
    }

    #[tokio::test]
    async fn test_async_terminal_completes_before_post() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(recording(2, &log));
        let terminal_log = log.clone();
        let terminal = async_terminal(move |arguments: Arc<Arguments>| {
            let log = terminal_log.clone();
            async move {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                log.lock().push("T".to_string());
                let quantity = arguments.extract::<u32>(&PLACE, 0)?;
                Ok(u64::from(quantity) + 1)
            }
        });

        let result = invoke(&chain, 2, terminal).await.unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 3);
        assert_eq!(*log.lock(), vec!["pre1", "pre2", "T", "post2", "post1"]);
    }

    #[tokio::test]
    async fn test_first_poll_stops_at_pending_terminal() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(recording(2, &log));
        let (tx, rx) = futures::channel::oneshot::channel::<u64>();
        let rx = Arc::new(Mutex::new(Some(rx)));
        let terminal_log = log.clone();
        let terminal = async_terminal(move |_| {
            let rx = rx.lock().take();
            let log = terminal_log.clone();
            async move {
                let total = rx.ok_or_else(|| anyhow::anyhow!("terminal called twice"))?.await?;
                log.lock().push("T".to_string());
                Ok(total)
            }
        });

        let mut outcome = invoke(&chain, 2, terminal);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        assert!(outcome.poll_unpin(&mut cx).is_pending());
        assert_eq!(*log.lock(), vec!["pre1", "pre2"]);

        tx.send(42).unwrap();
        let result = outcome.await.unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 42);
        assert_eq!(*log.lock(), vec!["pre1", "pre2", "T", "post2", "post1"]);
    }

    #[tokio::test]
    async fn test_cancelled_task_reaches_post_logic() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(vec![Arc::new(ErrorRecording { log: log.clone() })]);
        let terminal = terminal(|_| {
            let handle = tokio::spawn(futures::future::pending::<anyhow::Result<u64>>());
            handle.abort();
            outcome::spawned(PLACE, handle)
        });

        let err = invoke(&chain, 1, terminal).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InterceptError>(),
            Some(InterceptError::Cancelled { .. })
        ));
        assert_eq!(*log.lock(), vec!["pre".to_string(), format!("post:{}", err)]);
    }

    #[test]
    fn test_sync_chain_resolves_without_runtime() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(recording(2, &log));

        let result = chain
            .invoke_sync(
                TypeKey::of::<OrderService>(),
                PLACE,
                Arguments::new().with(3u32),
                logging_terminal(&log),
            )
            .unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 30);
        assert_eq!(log.lock().len(), 5);
    }

    #[test]
    fn test_sync_chain_suspension_is_an_error() {
        let chain = InterceptorChain::new(Vec::new());
        let terminal = terminal(|_| futures::future::pending::<InvocationResult>().boxed());

        let err = chain
            .invoke_sync(
                TypeKey::of::<OrderService>(),
                PLACE,
                Arguments::new(),
                terminal,
            )
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InterceptError>(),
            Some(InterceptError::SuspendedSyncCall { .. })
        ));
    }

    #[tokio::test]
    async fn test_proceed_with_replaces_arguments() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(vec![Arc::new(Doubling)]);

        let result = invoke(&chain, 4, logging_terminal(&log)).await.unwrap();

        assert_eq!(downcast_value::<u64>(&PLACE, result).unwrap(), 80);
    }

    #[tokio::test]
    async fn test_chain_is_shared_across_calls() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(recording(1, &log));

        let calls = (1..=4u32).map(|q| invoke(&chain, q, logging_terminal(&log)));
        let results = futures::future::join_all(calls).await;

        let totals: Vec<u64> = results
            .into_iter()
            .map(|r| downcast_value::<u64>(&PLACE, r.unwrap()).unwrap())
            .collect();
        assert_eq!(totals, vec![10, 20, 30, 40]);
        assert_eq!(log.lock().len(), 12);
    }
}
