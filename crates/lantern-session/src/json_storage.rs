//! # JsonFileStore Implementation
//!
//! 基于 JSON 文件的键值存储，每个键对应一个文件。
//!
//! 存储结构:
//! ```text
//! <base_path>/
//! ├── <encoded_key>.json
//! └── ...
//! ```
//!
//! 键中除 `[A-Za-z0-9._-]` 以外的字节按 `%XX` 编码，
//! 因此 `owner/repo/file.gguf` 这类模型 ID 可以直接作为键使用。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::storage::KeyValueStore;

/// JsonFileStore 配置
#[derive(Debug, Clone)]
pub struct JsonFileStoreConfig {
    /// 存储根目录
    pub base_path: PathBuf,
    /// 是否格式化输出
    pub pretty: bool,
}

impl JsonFileStoreConfig {
    /// 创建默认配置
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            pretty: false,
        }
    }

    /// 启用格式化输出
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for JsonFileStoreConfig {
    fn default() -> Self {
        Self::new("~/.lantern/conversations")
    }
}

/// JSON 文件键值存储
#[derive(Debug)]
pub struct JsonFileStore {
    config: JsonFileStoreConfig,
    base_path: PathBuf,
}

impl JsonFileStore {
    /// 创建存储，目录不存在时自动创建
    pub async fn new(config: JsonFileStoreConfig) -> StorageResult<Self> {
        let base_path_str = config.base_path.to_string_lossy().to_string();
        let base_path = shellexpand::tilde(&base_path_str);
        let base_path = PathBuf::from(base_path.as_ref());

        fs::create_dir_all(&base_path).await?;

        info!("JsonFileStore initialized at {:?}", base_path);

        Ok(Self { config, base_path })
    }

    /// 存储根目录（已展开 `~`）
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 获取键对应的文件路径
    fn file_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::invalid_key(key));
        }
        Ok(self.base_path.join(format!("{}.json", encode_key(key))))
    }

    /// 列出所有已保存的键
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                match decode_key(stem) {
                    Some(key) => keys.push(key),
                    None => warn!("Skipping file with undecodable name: {}", name),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn load(&self, key: &str) -> StorageResult<Option<Value>> {
        let path = self.file_path(key)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&content)?;
        debug!("Loaded {:?}", path);
        Ok(Some(value))
    }

    async fn save(&self, key: &str, value: &Value) -> StorageResult<()> {
        let path = self.file_path(key)?;
        let content = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        // 先写临时文件再重命名，避免写到一半的文件被读到
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("Saved {:?}", path);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.file_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_key_encoding() {
        let key = "ggml-org/tinygemma3-GGUF/tinygemma3-Q8_0.gguf";
        let encoded = encode_key(key);
        assert!(!encoded.contains('/'));
        assert_eq!(decode_key(&encoded).as_deref(), Some(key));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(JsonFileStoreConfig::new(temp_dir.path()))
            .await
            .unwrap();

        let key = "owner/repo/model.gguf";
        assert!(store.load(key).await.unwrap().is_none());

        store.save(key, &json!([{"text": "hi"}])).await.unwrap();
        let loaded = store.load(key).await.unwrap().unwrap();
        assert_eq!(loaded[0]["text"], "hi");
        assert_eq!(store.keys().await.unwrap(), vec![key.to_string()]);
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(JsonFileStoreConfig::new(temp_dir.path()))
            .await
            .unwrap();

        store.save("m", &json!(1)).await.unwrap();
        store.remove("m").await.unwrap();
        store.remove("m").await.unwrap();
        assert!(!store.exists("m").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(JsonFileStoreConfig::new(temp_dir.path()))
            .await
            .unwrap();

        assert!(matches!(
            store.save("", &json!(1)).await,
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(JsonFileStoreConfig::new(temp_dir.path()))
            .await
            .unwrap();

        fs::write(temp_dir.path().join("bad.json"), "{not json")
            .await
            .unwrap();
        assert!(matches!(
            store.load("bad").await,
            Err(StorageError::Serialization(_))
        ));
    }
}
