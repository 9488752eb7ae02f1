//! # Lantern Session Storage
//!
//! 本地模型对话记录的持久化存储。
//!
//! ## 功能特性
//!
//! - **键值存储抽象**：`KeyValueStore` trait，值为 JSON
//! - **文件存储**：每个键一个 JSON 文件，写入时原子替换
//! - **内存存储**：测试和临时会话使用
//! - **对话记录**：按模型 ID 保存，加载时在后台生成摘要
//!
//! ## 存储结构
//!
//! ```text
//! <base_path>/
//! ├── <encoded_model_id>.json    # 按时间顺序保存的消息数组
//! └── ...
//! ```
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use lantern_session::{ConversationStore, JsonFileStore, JsonFileStoreConfig};
//! use lantern_core::Message;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(JsonFileStore::new(JsonFileStoreConfig::new("~/.lantern/conversations")).await?);
//!     let store = ConversationStore::new(storage);
//!
//!     store.load("llama3.2:1b").await?;
//!     store.append([Message::assistant("Hi!"), Message::user("Hello")]);
//!     store.flush().await?;
//!     Ok(())
//! }
//! ```

pub mod conversation;
pub mod error;
pub mod json_storage;
pub mod memory_storage;
pub mod storage;

// 重新导出主要类型
pub use conversation::{
    ConversationStore, ConversationStoreConfig, ReadyHandleLookup,
    DEFAULT_SUMMARY_PROMPT, DEFAULT_SUMMARY_TURNS,
};
pub use error::{StorageError, StorageResult};
pub use json_storage::{JsonFileStore, JsonFileStoreConfig};
pub use memory_storage::MemoryStore;
pub use storage::{load_typed, save_typed, KeyValueStore};

/// 版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 创建默认存储路径
pub fn default_storage_path() -> std::path::PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".lantern").join("conversations"))
        .unwrap_or_else(|| std::path::PathBuf::from("./lantern_conversations"))
}
