//! Lantern Config 集成模块
//!
//! 将 `~/.lantern/config.json` 中的 logging 段转换为观测性配置。

use crate::config::{Config as ObservabilityConfig, LoggingConfig};

impl From<&lantern_config::LoggingConfig> for LoggingConfig {
    fn from(config: &lantern_config::LoggingConfig) -> Self {
        Self {
            level: config.level.as_str().to_string(),
            json_format: config.json_format,
            file_path: config
                .file
                .as_deref()
                .and_then(lantern_config::expand_tilde),
            ..Self::default()
        }
    }
}

impl From<&lantern_config::Config> for ObservabilityConfig {
    fn from(config: &lantern_config::Config) -> Self {
        Self {
            logging: LoggingConfig::from(&config.logging),
            ..Self::default()
        }
    }
}
