//! 拦截框架错误定义
//!
//! 构造期错误（配置、解析、初始化）在代理创建时立即失败；
//! 运行期由拦截器或目标方法产生的错误不会被包装，以原始的 `anyhow::Error` 传递给调用方。

use thiserror::Error;

/// 拦截框架错误
#[derive(Debug, Error)]
pub enum InterceptError {
    /// 声明引用的类型不满足拦截器契约，或组件没有暴露任何能力接口
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 声明的拦截器类型无法解析为实例
    #[error("Failed to resolve interceptor '{kind}'")]
    Resolution {
        kind: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// 拦截器实例重复初始化，或在初始化前被使用
    #[error("Interceptor '{interceptor}' {reason}")]
    Initialization {
        interceptor: String,
        reason: &'static str,
    },

    /// 参数位置或类型与方法签名不符
    #[error("Argument #{index} of '{method}' is not a '{expected}'")]
    ArgumentMismatch {
        method: String,
        index: usize,
        expected: &'static str,
    },

    /// 拦截链返回值的类型与方法签名不符
    #[error("Return value of '{method}' is not a '{expected}'")]
    ReturnTypeMismatch {
        method: String,
        expected: &'static str,
    },

    /// 同步方法的拦截链中有环节挂起
    #[error("Synchronous call '{method}' suspended inside the interceptor chain")]
    SuspendedSyncCall { method: String },

    /// 异步目标调用被取消
    #[error("Terminal call '{method}' was cancelled")]
    Cancelled { method: String },

    /// 代理对象没有暴露请求的接口
    #[error("Component '{component}' does not expose interface '{interface}'")]
    UnknownInterface {
        component: String,
        interface: String,
    },
}

impl InterceptError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn resolution(kind: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Resolution {
            kind: kind.into(),
            source: source.into(),
        }
    }

    /// 是否为构造期错误
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Resolution { .. } | Self::Initialization { .. }
        )
    }
}

/// 拦截框架结果类型
pub type InterceptResult<T> = Result<T, InterceptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_keeps_source() {
        let err = InterceptError::resolution("RetryInterceptor", anyhow::anyhow!("no backend"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("no backend"));
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_runtime_errors_are_not_construction_errors() {
        let err = InterceptError::SuspendedSyncCall {
            method: "total()".to_string(),
        };
        assert!(!err.is_construction_error());
        assert_eq!(
            err.to_string(),
            "Synchronous call 'total()' suspended inside the interceptor chain"
        );
    }
}
