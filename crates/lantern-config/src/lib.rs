//! # Lantern Config
//!
//! `~/.lantern/config.json` 配置文件的读取、验证与修改。
//!
//! 配置文件支持 `${VAR}` 和 `${VAR:-default}` 形式的环境变量展开。

pub mod config;
pub mod manager;

pub use config::{
    ChatConfig, Config, ConfigError, ConfigResult, LogLevel, LoggingConfig, RuntimeSettings,
    StorageConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// 获取 Lantern 配置目录路径
pub fn lantern_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lantern"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    lantern_dir().map(|dir| dir.join("config.json"))
}

/// 获取默认对话记录目录
pub fn default_conversations_dir() -> Option<PathBuf> {
    lantern_dir().map(|dir| dir.join("conversations"))
}

/// 获取默认日志文件路径
pub fn default_log_path() -> Option<PathBuf> {
    lantern_dir().map(|dir| dir.join("logs").join("lantern.log"))
}

/// 初始化 Lantern 目录结构
pub async fn init_lantern_dirs() -> ConfigResult<()> {
    if let Some(lantern) = lantern_dir() {
        tokio::fs::create_dir_all(&lantern).await?;
        tokio::fs::create_dir_all(lantern.join("conversations")).await?;
        tokio::fs::create_dir_all(lantern.join("logs")).await?;
    }
    Ok(())
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
