pub mod error;
pub mod runtime;
pub mod providers;

pub use error::{LLMError, Result};
pub use runtime::{
    DownloadProgress, LanguageModel, ModelHandle, ModelRuntime, ProgressCallback, RuntimeConfig,
    RuntimeMetadata, TextStream,
};
pub use providers::{OllamaModel, OllamaRuntime};
