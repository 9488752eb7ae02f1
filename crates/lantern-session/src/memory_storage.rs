//! # MemoryStore
//!
//! 基于 DashMap 的内存键值存储，用于测试和无需落盘的场景。

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::StorageResult;
use crate::storage::KeyValueStore;

/// 内存键值存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一条记录
    pub fn with_entry(self, key: impl Into<String>, value: Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// 当前记录数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn save(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}
