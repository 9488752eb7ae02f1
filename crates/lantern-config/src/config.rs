use serde::{Deserialize, Serialize};

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            runtime: RuntimeSettings::default(),
            chat: ChatConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_bool(value: &str) -> ConfigResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::Validation(format!("Invalid boolean: {}", value))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

impl Config {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["runtime", "base_url"] => Some(self.runtime.base_url.clone()),
            ["runtime", "timeout_seconds"] => Some(self.runtime.timeout_seconds.to_string()),
            ["runtime", "keep_alive"] => self.runtime.keep_alive.clone(),
            ["chat", "use_context_history"] => Some(self.chat.use_context_history.to_string()),
            ["chat", "keep_latest_context_messages"] => {
                Some(self.chat.keep_latest_context_messages.to_string())
            }
            ["chat", "summary_turns"] => Some(self.chat.summary_turns.to_string()),
            ["chat", "summary_prompt"] => Some(self.chat.summary_prompt.clone()),
            ["chat", "frame_interval_ms"] => Some(self.chat.frame_interval_ms.to_string()),
            ["storage", "path"] => Some(self.storage.path.clone()),
            ["logging", "level"] => Some(self.logging.level.as_str().to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["runtime", "base_url"] => {
                self.runtime.base_url = value.to_string();
            }
            ["runtime", "timeout_seconds"] => {
                self.runtime.timeout_seconds = parse_number(value)?;
            }
            ["runtime", "keep_alive"] => {
                self.runtime.keep_alive = Some(value.to_string());
            }
            ["chat", "use_context_history"] => {
                self.chat.use_context_history = parse_bool(value)?;
            }
            ["chat", "keep_latest_context_messages"] => {
                self.chat.keep_latest_context_messages = parse_number(value)?;
            }
            ["chat", "summary_turns"] => {
                self.chat.summary_turns = parse_number(value)?;
            }
            ["chat", "summary_prompt"] => {
                self.chat.summary_prompt = value.to_string();
            }
            ["chat", "frame_interval_ms"] => {
                self.chat.frame_interval_ms = parse_number(value)?;
            }
            ["storage", "path"] => {
                self.storage.path = value.to_string();
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json_format"] => {
                self.logging.json_format = parse_bool(value)?;
            }
            ["logging", "file"] => {
                self.logging.file = Some(value.to_string());
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

/// 模型运行时（Ollama 兼容服务）配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// 模型在服务端保持加载的时长，例如 "5m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            timeout_seconds: 60,
            keep_alive: None,
        }
    }
}

/// 对话配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    /// 每轮对话是否携带历史消息
    pub use_context_history: bool,
    /// 上下文溢出时保留的最近消息数（不含当前用户消息）
    pub keep_latest_context_messages: usize,
    /// 摘要使用的最早消息数
    pub summary_turns: usize,
    pub summary_prompt: String,
    /// 流式输出刷新间隔（毫秒）
    pub frame_interval_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            use_context_history: true,
            keep_latest_context_messages: 3,
            summary_turns: 5,
            summary_prompt:
                "Summarize this conversation in one sentence, using the same language as the conversation."
                    .to_string(),
            frame_interval_ms: 16,
        }
    }
}

/// Storage 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// 对话记录目录
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "~/.lantern/conversations".to_string(),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    #[serde(default)]
    pub json_format: bool,
    /// 日志文件路径，未设置时只输出到 stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            file: Some("~/.lantern/logs/lantern.log".to_string()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
