pub mod ollama;

pub use ollama::{resolve_model_name, OllamaModel, OllamaRuntime};
