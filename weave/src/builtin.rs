//! 内置拦截器
//!
//! 通过 inventory 自动登记，可直接在声明中引用。

use crate::error_info::ErrorInfo;
use crate::interceptor::{InitContext, Interceptor, InterceptorType};
use crate::invocation::{Invocation, InvocationResult};
use crate::catalog::InterceptorRegistration;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// 日志拦截器：记录方法进入、退出和失败
///
/// 配置键：`(log_arguments: bool)`，默认不记录参数类型。
#[derive(Debug, Default)]
pub struct LoggingInterceptor {
    log_arguments: bool,
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "LoggingInterceptor"
    }

    fn initialize(&mut self, context: &InitContext<'_>) -> anyhow::Result<()> {
        self.log_arguments = context.config_key().bool(0).unwrap_or(false);
        Ok(())
    }

    async fn intercept(&self, invocation: Invocation) -> InvocationResult {
        let component = invocation.target_type();
        let method = invocation.method().name().to_string();

        if self.log_arguments {
            tracing::info!(
                "→ Entering: {}::{} {:?}",
                component,
                method,
                invocation.arguments()
            );
        } else {
            tracing::info!("→ Entering: {}::{}", component, method);
        }

        let started = Instant::now();
        let result = invocation.proceed().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => tracing::info!("← Exiting: {}::{} (took {:?})", component, method, elapsed),
            Err(e) => {
                let info = ErrorInfo::from_anyhow(e);
                tracing::error!(
                    error_type = %info.error_type,
                    "✗ Failed: {}::{} after {:?}: {}",
                    component,
                    method,
                    elapsed,
                    info
                );
            }
        }
        result
    }
}

impl InterceptorType for LoggingInterceptor {
    /// 最外层，记录到的耗时包含其他拦截器
    const DEFAULT_PRIORITY: i32 = 0;

    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

/// 计时拦截器：调用慢于阈值时告警
///
/// 配置键：`(threshold_ms: int)`，默认 100 毫秒。
#[derive(Debug)]
pub struct TimingInterceptor {
    threshold: Duration,
}

impl TimingInterceptor {
    pub const DEFAULT_THRESHOLD_MS: u64 = 100;

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Default for TimingInterceptor {
    fn default() -> Self {
        Self {
            threshold: Duration::from_millis(Self::DEFAULT_THRESHOLD_MS),
        }
    }
}

#[async_trait]
impl Interceptor for TimingInterceptor {
    fn name(&self) -> &str {
        "TimingInterceptor"
    }

    fn initialize(&mut self, context: &InitContext<'_>) -> anyhow::Result<()> {
        if let Some(millis) = context.config_key().int(0) {
            let millis = u64::try_from(millis)
                .map_err(|_| anyhow::anyhow!("threshold must not be negative, got {}", millis))?;
            self.threshold = Duration::from_millis(millis);
        }
        Ok(())
    }

    async fn intercept(&self, invocation: Invocation) -> InvocationResult {
        let started = Instant::now();
        let result = invocation.proceed().await;
        let elapsed = started.elapsed();

        if elapsed > self.threshold {
            tracing::warn!(
                "Slow method detected: {}::{} took {}ms (threshold: {}ms)",
                invocation.target_type(),
                invocation.method().name(),
                elapsed.as_millis(),
                self.threshold.as_millis()
            );
        } else {
            tracing::trace!(
                method = %invocation.method(),
                elapsed_us = elapsed.as_micros() as u64,
                "Method timing"
            );
        }
        result
    }
}

impl InterceptorType for TimingInterceptor {
    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

/// 重试拦截器：失败时重新执行后续拦截链
///
/// 配置键：`(attempts: int, backoff_ms: int)`，默认 3 次、无退避。
/// 退避等待会挂起调用，同步方法只能使用 0 退避。
#[derive(Debug)]
pub struct RetryInterceptor {
    attempts: u32,
    backoff: Duration,
}

impl RetryInterceptor {
    pub const DEFAULT_ATTEMPTS: u32 = 3;

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryInterceptor {
    fn default() -> Self {
        Self {
            attempts: Self::DEFAULT_ATTEMPTS,
            backoff: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &str {
        "RetryInterceptor"
    }

    fn initialize(&mut self, context: &InitContext<'_>) -> anyhow::Result<()> {
        let config = context.config_key();
        if let Some(attempts) = config.int(0) {
            self.attempts = u32::try_from(attempts)
                .ok()
                .filter(|a| *a > 0)
                .ok_or_else(|| anyhow::anyhow!("attempts must be positive, got {}", attempts))?;
        }
        if let Some(millis) = config.int(1) {
            let millis = u64::try_from(millis)
                .map_err(|_| anyhow::anyhow!("backoff must not be negative, got {}", millis))?;
            self.backoff = Duration::from_millis(millis);
        }
        Ok(())
    }

    async fn intercept(&self, invocation: Invocation) -> InvocationResult {
        let mut attempt = 1;
        loop {
            match invocation.proceed().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} of {}::{} failed: {}",
                        attempt,
                        self.attempts,
                        invocation.target_type(),
                        invocation.method().name(),
                        e
                    );
                    attempt += 1;
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
    }
}

impl InterceptorType for RetryInterceptor {
    /// 位于日志和计时之内，每次重试都经过内层拦截器
    const DEFAULT_PRIORITY: i32 = 10;

    fn create() -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

inventory::submit! { InterceptorRegistration::of::<LoggingInterceptor>() }
inventory::submit! { InterceptorRegistration::of::<TimingInterceptor>() }
inventory::submit! { InterceptorRegistration::of::<RetryInterceptor>() }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{async_terminal, sync_terminal, InterceptorChain};
    use crate::declaration::{ConfigKey, InterceptionDeclaration, InterceptorKind};
    use crate::interceptor::{InterceptorInstance, SharedInterceptor};
    use crate::invocation::{value, Arguments};
    use crate::method::{MethodId, TypeKey};
    use crate::outcome::downcast_value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct PaymentService;

    const CHARGE: MethodId = MethodId::new("charge", "(u64)->anyhow::Result<u64>");

    fn instance<T: InterceptorType>(config_key: ConfigKey) -> anyhow::Result<SharedInterceptor> {
        let kind = InterceptorKind::of::<T>();
        let declaration = InterceptionDeclaration::class(kind, None, config_key);
        let mut instance = InterceptorInstance::new(kind, Box::new(T::create()?));
        instance.initialize(&InitContext::new(TypeKey::of::<PaymentService>(), &declaration))?;
        Ok(instance.into_shared()?)
    }

    /// 前 `failures` 次调用失败
    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> crate::invocation::Terminal {
        sync_terminal(move |arguments: &Arguments| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= failures {
                anyhow::bail!("gateway timeout on call {}", call);
            }
            Ok(value(*arguments.get::<u64>(0).unwrap_or(&0)))
        })
    }

    fn invoke_sync(chain: &InterceptorChain, terminal: crate::invocation::Terminal) -> anyhow::Result<u64> {
        let result = chain.invoke_sync(
            TypeKey::of::<PaymentService>(),
            CHARGE,
            Arguments::new().with(250u64),
            terminal,
        )?;
        downcast_value(&CHARGE, result)
    }

    #[test]
    fn test_retry_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let chain = InterceptorChain::new(vec![
            instance::<RetryInterceptor>(ConfigKey::empty().with(3)).unwrap(),
        ]);

        assert_eq!(invoke_sync(&chain, flaky(2, calls.clone())).unwrap(), 250);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_gives_up_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let chain = InterceptorChain::new(vec![
            instance::<RetryInterceptor>(ConfigKey::empty().with(2)).unwrap(),
        ]);

        let err = invoke_sync(&chain, flaky(5, calls.clone())).unwrap_err();
        assert_eq!(err.to_string(), "gateway timeout on call 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_rejects_invalid_config() {
        assert!(instance::<RetryInterceptor>(ConfigKey::empty().with(0)).is_err());
        assert!(instance::<RetryInterceptor>(ConfigKey::empty().with(2).with(-5)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_on_async_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let chain = InterceptorChain::new(vec![
            instance::<RetryInterceptor>(ConfigKey::empty().with(3).with(50)).unwrap(),
        ]);
        let counter = calls.clone();
        let terminal = async_terminal(move |_: Arc<Arguments>| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 3 {
                    anyhow::bail!("busy");
                }
                Ok(call)
            }
        });

        let started = tokio::time::Instant::now();
        let result = chain
            .invoke(TypeKey::of::<PaymentService>(), CHARGE, Arguments::new(), terminal)
            .await
            .unwrap();

        assert_eq!(downcast_value::<u32>(&CHARGE, result).unwrap(), 3);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_logging_and_timing_pass_results_through() {
        let calls = Arc::new(AtomicU32::new(0));
        let chain = InterceptorChain::new(vec![
            instance::<LoggingInterceptor>(ConfigKey::empty().with(true)).unwrap(),
            instance::<TimingInterceptor>(ConfigKey::empty().with(5)).unwrap(),
        ]);

        assert_eq!(invoke_sync(&chain, flaky(0, calls.clone())).unwrap(), 250);
        let err = invoke_sync(&chain, flaky(10, calls)).unwrap_err();
        assert!(err.to_string().starts_with("gateway timeout"));
    }

    #[test]
    fn test_timing_config() {
        assert!(instance::<TimingInterceptor>(ConfigKey::empty().with(-1)).is_err());
        assert_eq!(
            TimingInterceptor::default().threshold(),
            Duration::from_millis(TimingInterceptor::DEFAULT_THRESHOLD_MS)
        );
    }

    #[test]
    fn test_builtins_are_registered() {
        let catalog = crate::catalog::InterceptorCatalog::new();
        catalog.load_inventory();

        for kind in [
            InterceptorKind::of::<LoggingInterceptor>(),
            InterceptorKind::of::<TimingInterceptor>(),
            InterceptorKind::of::<RetryInterceptor>(),
        ] {
            assert!(catalog.contains(&kind), "{} is not registered", kind);
        }
        use crate::declaration::CapabilityContract;
        assert_eq!(catalog.default_priority(&InterceptorKind::of::<RetryInterceptor>()), 10);
    }
}
