//! # Storage Traits
//!
//! 键值存储抽象。值以 JSON 形式保存，键由调用方决定（对话记录以模型 ID 为键）。

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StorageResult;

/// 基础键值存储 trait
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 读取键对应的值，不存在时返回 `None`
    async fn load(&self, key: &str) -> StorageResult<Option<Value>>;

    /// 写入键对应的值（完整替换）
    async fn save(&self, key: &str, value: &Value) -> StorageResult<()>;

    /// 删除键，键不存在时不报错
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// 检查键是否存在
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.load(key).await?.is_some())
    }
}

/// 读取并反序列化为指定类型
pub async fn load_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.load(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// 序列化后写入
pub async fn save_typed<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let value = serde_json::to_value(value)?;
    store.save(key, &value).await
}
