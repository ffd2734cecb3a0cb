//! 拦截器定义
//!
//! 拦截器是横切逻辑的载体，包围一次方法调用

use crate::declaration::{ConfigKey, InterceptionDeclaration, InterceptorKind};
use crate::error::{InterceptError, InterceptResult};
use crate::invocation::{Invocation, InvocationResult};
use crate::method::{MethodId, TypeKey};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// 默认优先级
pub const DEFAULT_PRIORITY: i32 = 1;

/// 拦截器 Trait
///
/// 实现此 trait 以定义环绕逻辑。`intercept` 中调用 `invocation.proceed()` 继续执行后续拦截器
/// 和目标方法；不调用则由拦截器自己给出结果（短路）。
///
/// ```ignore
/// struct Audit;
///
/// #[async_trait]
/// impl Interceptor for Audit {
///     async fn intercept(&self, invocation: Invocation) -> InvocationResult {
///         tracing::info!("calling {}", invocation.method());
///         let result = invocation.proceed().await;
///         tracing::info!("called {}", invocation.method());
///         result
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// 拦截器名称
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// 一次性初始化，接收声明上的配置
    fn initialize(&mut self, _context: &InitContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// 环绕通知（默认直接继续执行）
    async fn intercept(&self, invocation: Invocation) -> InvocationResult {
        invocation.proceed().await
    }
}

/// 可由目录直接创建的拦截器类型
pub trait InterceptorType: Interceptor + Sized {
    /// 声明未指定优先级时使用
    const DEFAULT_PRIORITY: i32 = DEFAULT_PRIORITY;

    fn create() -> anyhow::Result<Self>;
}

/// 初始化上下文
pub struct InitContext<'a> {
    target_type: TypeKey,
    declaration: &'a InterceptionDeclaration,
}

impl<'a> InitContext<'a> {
    pub fn new(target_type: TypeKey, declaration: &'a InterceptionDeclaration) -> Self {
        Self {
            target_type,
            declaration,
        }
    }

    /// 被代理的组件类型
    pub fn target_type(&self) -> TypeKey {
        self.target_type
    }

    /// 方法级别声明的目标方法
    pub fn target_method(&self) -> Option<&MethodId> {
        self.declaration.target_method()
    }

    pub fn config_key(&self) -> &ConfigKey {
        self.declaration.config_key()
    }

    pub fn priority(&self) -> i32 {
        self.declaration.priority()
    }

    pub fn declaration(&self) -> &InterceptionDeclaration {
        self.declaration
    }
}

/// 共享的拦截器实例
pub type SharedInterceptor = Arc<dyn Interceptor>;

/// 已解析的拦截器实例
///
/// 每个实例在使用前恰好初始化一次。初始化通过 `&mut self` 进行，
/// 独占借用保证了不会并发初始化。
pub struct InterceptorInstance {
    kind: InterceptorKind,
    interceptor: Box<dyn Interceptor>,
    priority: i32,
    initialized: bool,
}

impl InterceptorInstance {
    pub fn new(kind: InterceptorKind, interceptor: Box<dyn Interceptor>) -> Self {
        Self {
            kind,
            interceptor,
            priority: DEFAULT_PRIORITY,
            initialized: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> InterceptorKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        self.interceptor.name()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 初始化实例
    ///
    /// 第二次调用返回 `Initialization` 错误；这是编程错误，调用方不应吞掉它。
    pub fn initialize(&mut self, context: &InitContext<'_>) -> InterceptResult<()> {
        if self.initialized {
            return Err(InterceptError::Initialization {
                interceptor: self.name().to_string(),
                reason: "is already initialized",
            });
        }

        self.interceptor.initialize(context).map_err(|e| {
            InterceptError::configuration(format!(
                "interceptor '{}' rejected declaration config {} on '{}': {:#}",
                self.kind,
                context.config_key(),
                context.target_type(),
                e
            ))
        })?;

        self.initialized = true;
        Ok(())
    }

    /// 冻结为可共享的实例
    pub fn into_shared(self) -> InterceptResult<SharedInterceptor> {
        if !self.initialized {
            return Err(InterceptError::Initialization {
                interceptor: self.name().to_string(),
                reason: "was used before initialization",
            });
        }
        Ok(Arc::from(self.interceptor))
    }
}

impl fmt::Debug for InterceptorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorInstance")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("initialized", &self.initialized)
            .finish()
    }
}
