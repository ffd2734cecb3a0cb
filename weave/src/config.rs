//! 拦截框架配置
//!
//! ```toml
//! enabled = true
//! disabled_interceptors = ["TimingInterceptor"]
//!
//! [logging]
//! level = "debug"
//! format = "compact"
//! ```

use crate::declaration::InterceptorKind;
use crate::error::{InterceptError, InterceptResult};
use crate::logging::LoggingConfig;
use serde::Deserialize;
use std::path::Path;

/// 拦截框架配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    /// 关闭时 `build_proxy` 返回未包装的组件
    pub enabled: bool,

    /// 被禁用的拦截器（完整类型名或短名），其声明在发现阶段被丢弃
    pub disabled_interceptors: Vec<String>,

    pub logging: LoggingConfig,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_interceptors: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WeaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(source: &str) -> InterceptResult<Self> {
        toml::from_str(source)
            .map_err(|e| InterceptError::configuration(format!("invalid weave config: {}", e)))
    }

    /// 从 TOML 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> InterceptResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            InterceptError::configuration(format!(
                "failed to read weave config '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "Loaded weave config");
        Ok(config)
    }

    /// 用环境变量覆盖配置
    ///
    /// - `WEAVE_ENABLED`：`true` / `false` / `1` / `0`
    /// - `WEAVE_DISABLED_INTERCEPTORS`：逗号分隔的拦截器名
    pub fn apply_env(mut self) -> Self {
        if let Ok(enabled) = std::env::var("WEAVE_ENABLED") {
            match parse_bool(&enabled) {
                Some(enabled) => self.enabled = enabled,
                None => tracing::warn!("Ignoring invalid WEAVE_ENABLED value '{}'", enabled),
            }
        }
        if let Ok(disabled) = std::env::var("WEAVE_DISABLED_INTERCEPTORS") {
            self.disabled_interceptors = split_names(&disabled);
        }
        self.logging = self.logging.apply_env();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 禁用一个拦截器
    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.disabled_interceptors.push(name.into());
        self
    }

    pub fn is_disabled(&self, kind: &InterceptorKind) -> bool {
        self.disabled_interceptors
            .iter()
            .any(|name| kind.matches_name(name))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn split_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}
