use lantern_llm::LLMError;
use lantern_session::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The model handle was released or replaced while a generation was using it
    #[error("Model is no longer available")]
    ModelUnavailable,

    #[error("Cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn is_context_overflow(&self) -> bool {
        match self {
            ChatError::Llm(e) => e.is_context_overflow(),
            _ => false,
        }
    }

    /// Text shown in place of the assistant reply when a turn fails
    pub fn render(&self) -> String {
        let detail = match self {
            ChatError::Llm(e) => e.detail(),
            other => other.to_string(),
        };
        format!("Error: {}", detail)
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
