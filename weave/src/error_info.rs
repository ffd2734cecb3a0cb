//! 结构化错误信息
//!
//! 供拦截器记录失败调用时使用，不改变错误本身。

use std::error::Error;
use std::fmt;

/// 结构化的错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// 错误消息
    pub message: String,

    /// 错误类型名称（无法确定时为 `anyhow::Error`）
    pub error_type: String,

    /// 错误源链（不含最外层）
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    /// 从标准错误创建
    pub fn from_error<E: Error>(error: &E) -> Self {
        Self {
            message: error.to_string(),
            error_type: std::any::type_name::<E>().to_string(),
            source_chain: source_chain(error.source()),
        }
    }

    /// 从 `anyhow::Error` 创建
    ///
    /// 框架自身的错误会被识别出具体类型，其余错误只保留消息和源链。
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let error_type = if error.is::<crate::error::InterceptError>() {
            std::any::type_name::<crate::error::InterceptError>()
        } else {
            "anyhow::Error"
        };

        Self {
            message: error.to_string(),
            error_type: error_type.to_string(),
            source_chain: error.chain().skip(1).map(|e| e.to_string()).collect(),
        }
    }

    /// 只包含消息
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "Unknown".to_string(),
            source_chain: Vec::new(),
        }
    }

    /// 完整描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for source in &self.source_chain {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

fn source_chain(mut current: Option<&(dyn Error + 'static)>) -> Vec<String> {
    let mut chain = Vec::new();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}
