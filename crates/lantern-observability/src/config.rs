//! 配置管理模块
//!
//! 支持从配置文件或 lantern-config 读取日志配置。

#[cfg(feature = "lantern-config")]
pub mod lantern_integration;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// 观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 应用名称
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 从 JSON 文件加载配置
    pub fn from_file(path: impl Into<PathBuf>) -> crate::error::Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(crate::error::ObservabilityError::config(
                "Unsupported config file format",
            )),
        }
    }

    /// 设置日志级别
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    /// 设置是否使用 JSON 格式
    pub fn with_json_format(mut self, json: bool) -> Self {
        self.logging.json_format = json;
        self
    }

    /// 设置日志文件路径
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.logging.file_path = Some(path.into());
        self
    }

    /// 是否输出到 stderr
    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.logging.stderr = enabled;
        self
    }

    /// 添加模块特定的日志级别
    pub fn with_module_level(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.logging.module_levels.insert(module.into(), level.into());
        self
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（trace, debug, info, warn, error）或完整的过滤指令
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否使用 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 是否输出到 stderr（交互式终端占用 stdout）
    #[serde(default = "default_true")]
    pub stderr: bool,

    /// 日志文件路径，设置后同时写入文件
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// 模块级别的日志配置
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// 是否启用 ANSI 颜色
    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    /// 是否包含目标（target）
    #[serde(default = "default_true")]
    pub include_target: bool,

    /// 是否包含线程 ID
    #[serde(default)]
    pub include_thread_id: bool,

    /// 是否包含行号
    #[serde(default)]
    pub include_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            stderr: true,
            file_path: None,
            module_levels: HashMap::new(),
            ansi_colors: true,
            include_target: true,
            include_thread_id: false,
            include_line_number: false,
        }
    }
}

fn default_app_name() -> String {
    "lantern".to_string()
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_true() -> bool {
    true
}
