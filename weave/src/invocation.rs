//! 调用上下文
//!
//! 一次被拦截的方法调用：方法标识、参数，以及继续执行拦截链的句柄。

use crate::error::InterceptError;
use crate::interceptor::SharedInterceptor;
use crate::method::{MethodId, TypeKey};
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// 类型擦除后的返回值
pub type Value = Box<dyn Any + Send>;

/// 拦截链中每一环的结果
///
/// 错误就是目标方法或拦截器返回的原始错误，调用方可以直接 `downcast_ref`。
pub type InvocationResult = anyhow::Result<Value>;

/// 延迟结果
///
/// 同步方法的结果是已就绪的 future，异步方法的结果在被 await 时才完成。
pub type Outcome = BoxFuture<'static, InvocationResult>;

/// 目标调用
///
/// 拦截链的最后一环，接收（可能被替换过的）参数并调用真正的组件方法。
pub type Terminal = Arc<dyn Fn(Arc<Arguments>) -> Outcome + Send + Sync>;

/// 擦除返回值
pub fn value<T: Any + Send>(value: T) -> Value {
    Box::new(value)
}

/// 单个参数
#[derive(Clone)]
struct Argument {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// 调用参数
///
/// 按位置保存。终点调用可能执行多次（例如重试），所以参数以共享方式保存并在使用时克隆。
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Argument>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个参数（构建器风格）
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.push(Argument {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        });
    }

    /// 替换指定位置的参数，位置越界时返回 `false`
    pub fn replace<T: Any + Send + Sync>(&mut self, index: usize, value: T) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = Argument {
                    value: Arc::new(value),
                    type_name: std::any::type_name::<T>(),
                };
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按位置和类型读取参数
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.values.get(index)?.value.downcast_ref::<T>()
    }

    /// 参数的类型名
    pub fn type_name(&self, index: usize) -> Option<&'static str> {
        self.values.get(index).map(|a| a.type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|a| a.type_name)
    }

    /// 取出参数的副本，供终点调用使用
    ///
    /// 类型或位置不符时返回 `ArgumentMismatch`。
    pub fn extract<T: Any + Clone>(&self, method: &MethodId, index: usize) -> anyhow::Result<T> {
        self.get::<T>(index).cloned().ok_or_else(|| {
            InterceptError::ArgumentMismatch {
                method: method.to_string(),
                index,
                expected: std::any::type_name::<T>(),
            }
            .into()
        })
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.type_names()).finish()
    }
}

/// 一次调用在拦截链中共享的状态
pub(crate) struct ChainState {
    pub(crate) target_type: TypeKey,
    pub(crate) method: MethodId,
    pub(crate) interceptors: Arc<[SharedInterceptor]>,
    pub(crate) terminal: Terminal,
    pub(crate) started: Instant,
}

impl ChainState {
    /// 从第 `index` 个拦截器开始执行
    pub(crate) fn run(state: Arc<ChainState>, index: usize, arguments: Arc<Arguments>) -> Outcome {
        match state.interceptors.get(index).cloned() {
            Some(interceptor) => {
                let invocation = Invocation {
                    state,
                    arguments,
                    next: index + 1,
                };
                Box::pin(async move { interceptor.intercept(invocation).await })
            }
            None => (state.terminal)(arguments),
        }
    }
}

/// 调用上下文
///
/// 传给 [`Interceptor::intercept`](crate::Interceptor::intercept)。`proceed` 可以调用零次（短路）、
/// 一次或多次（重试），每次都会重新执行后续拦截器和目标方法。
pub struct Invocation {
    state: Arc<ChainState>,
    arguments: Arc<Arguments>,
    next: usize,
}

impl Invocation {
    /// 被调用的方法
    pub fn method(&self) -> &MethodId {
        &self.state.method
    }

    /// 被代理的组件类型
    pub fn target_type(&self) -> TypeKey {
        self.state.target_type
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// 按位置读取参数
    pub fn argument<T: Any>(&self, index: usize) -> Option<&T> {
        self.arguments.get(index)
    }

    /// 调用进入拦截链的时间
    pub fn started_at(&self) -> Instant {
        self.state.started
    }

    /// 当前拦截器在链中的位置（从 0 开始）
    pub fn position(&self) -> usize {
        self.next - 1
    }

    /// 继续执行后续拦截器和目标方法
    pub fn proceed(&self) -> Outcome {
        ChainState::run(self.state.clone(), self.next, self.arguments.clone())
    }

    /// 以新的参数继续执行
    pub fn proceed_with(&self, arguments: Arguments) -> Outcome {
        ChainState::run(self.state.clone(), self.next, Arc::new(arguments))
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("target_type", &self.state.target_type)
            .field("method", &self.state.method)
            .field("arguments", &self.arguments)
            .field("position", &self.position())
            .finish()
    }
}
