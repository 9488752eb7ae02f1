//! # Storage Error Types
//!
//! 定义存储系统相关的错误类型。

use thiserror::Error;

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化/反序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 无效的键
    #[error("Invalid key: {key}")]
    InvalidKey { key: String },

    /// 配置错误
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// 其他错误
    #[error("Storage error: {message}")]
    Other { message: String },
}

impl StorageError {
    /// 创建其他错误
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// 创建无效键错误
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }
}

/// 存储结果类型
pub type StorageResult<T> = Result<T, StorageError>;
