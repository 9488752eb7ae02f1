pub mod config;
pub mod base;
pub mod metadata;

pub use config::RuntimeConfig;
pub use metadata::{
    DownloadProgress, LanguageModel, ModelHandle, ModelRuntime, ProgressCallback,
    RuntimeMetadata, TextStream,
};
