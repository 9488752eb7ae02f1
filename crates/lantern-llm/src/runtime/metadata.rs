use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use lantern_core::chat::GenerationRequest;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

/// Stream of text deltas produced by a generation call
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Shared handle to a prepared model
pub type ModelHandle = Arc<dyn LanguageModel>;

/// Invoked from inside a download as bytes arrive
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Byte counts reported while an artifact is fetched
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }

    /// Completion in the range 0..=100, if the total size is known
    pub fn percentage(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => {
                Some((self.loaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        }
    }
}

/// Runtime metadata
#[derive(Debug, Clone)]
pub struct RuntimeMetadata {
    /// Runtime ID
    pub id: String,
    /// Human-readable name
    pub name: String,
}

/// On-device model runtime.
///
/// Owns the model artifacts: fetching, loading and deleting them. Loading
/// yields a [`ModelHandle`] that serves generation requests.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Get the runtime ID
    fn runtime_id(&self) -> &str;

    /// Get runtime metadata
    fn metadata(&self) -> &RuntimeMetadata;

    /// Whether the artifact for `model_id` is present locally
    async fn is_downloaded(&self, model_id: &str) -> Result<bool>;

    /// Fetch the artifact for `model_id`, reporting progress as it goes
    async fn download(&self, model_id: &str, on_progress: ProgressCallback) -> Result<()>;

    /// Load a downloaded model and return a handle to it
    async fn prepare(&self, model_id: &str) -> Result<ModelHandle>;

    /// Delete the local artifact for `model_id`
    async fn remove(&self, model_id: &str) -> Result<()>;
}

/// A loaded model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Stream the response to `request` as text deltas
    async fn stream(&self, request: GenerationRequest) -> Result<TextStream>;

    /// One-shot generation
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let parts: Vec<String> = self.stream(request).await?.try_collect().await?;
        Ok(parts.concat())
    }

    /// Release the resources held by the loaded model
    async fn unload(&self) -> Result<()>;
}
