//! Weave - 声明式方法拦截
//!
//! 为容器管理的组件提供横切逻辑（日志、计时、重试等），支持：
//! - 类级别、方法级别的拦截声明与忽略声明
//! - 方法级别覆盖类级别，按优先级稳定排序
//! - 同步、异步方法统一的洋葱式拦截链
//! - 编译期生成转发代理（`#[interceptable]`）与注册记录（`#[intercepted]`）
//! - 通过组件后置处理器接入容器

pub mod activation;
pub mod builtin;
pub mod catalog;
pub mod chain;
pub mod config;
pub mod declaration;
pub mod error;
pub mod error_info;
pub mod interceptor;
pub mod invocation;
pub mod logging;
pub mod method;
pub mod outcome;
pub mod proxy;
pub mod selection;
pub mod source;
pub mod weaver;

// 重新导出核心类型
pub use activation::{ComponentPostProcessor, InterceptionPostProcessor};
pub use builtin::{LoggingInterceptor, RetryInterceptor, TimingInterceptor};
pub use catalog::{InterceptorCatalog, InterceptorFactory, InterceptorRegistration, InterceptorResolver};
pub use chain::{async_terminal, sync_terminal, terminal, InterceptorChain};
pub use config::WeaveConfig;
pub use declaration::{
    discover, CapabilityContract, ConfigComponent, ConfigKey, DeclarationRef, DeclarationScope,
    DeclarationTable, IgnoreDeclaration, InterceptionDeclaration, InterceptorKind,
};
pub use error::{InterceptError, InterceptResult};
pub use error_info::ErrorInfo;
pub use interceptor::{
    InitContext, Interceptor, InterceptorInstance, InterceptorType, SharedInterceptor,
    DEFAULT_PRIORITY,
};
pub use invocation::{value, Arguments, Invocation, InvocationResult, Outcome, Terminal, Value};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use method::{MethodId, TypeKey};
pub use outcome::{downcast_value, spawned};
pub use proxy::{
    CapabilityInterface, ComponentBuilder, ComponentRegistration, Dispatcher, ExposedInterface,
    InterfaceSubmission, ProxiedComponent,
};
pub use selection::{select_declarations, Selection, SelectionEngine};
pub use source::{
    DeclarationBuilder, DeclarationRegistry, DeclarationSource, DeclarationSubmission, SourceSet,
    SubmittedDeclaration,
};
pub use weaver::{global_weaver, Weaver, WeaverBuilder};

pub use weave_macros::{interceptable, intercepted};

// 导出宏生成代码依赖的库
pub use async_trait;
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::activation::{ComponentPostProcessor, InterceptionPostProcessor};
    pub use crate::builtin::{LoggingInterceptor, RetryInterceptor, TimingInterceptor};
    pub use crate::config::WeaveConfig;
    pub use crate::declaration::{ConfigKey, InterceptorKind};
    pub use crate::error::{InterceptError, InterceptResult};
    pub use crate::interceptor::{InitContext, Interceptor, InterceptorType};
    pub use crate::invocation::{value, Arguments, Invocation, InvocationResult};
    pub use crate::method::{MethodId, TypeKey};
    pub use crate::outcome::downcast_value;
    pub use crate::proxy::{ComponentRegistration, ProxiedComponent};
    pub use crate::weaver::{global_weaver, Weaver};
    pub use crate::{interceptable, intercepted};
    pub use async_trait::async_trait;
}
