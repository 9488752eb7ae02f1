use thiserror::Error;

/// Unified error type for model runtime operations
#[derive(Error, Debug)]
pub enum LLMError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("prepare failed: {0}")]
    Prepare(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LLMError {
    /// Whether the runtime rejected the request because the prompt no longer
    /// fits the model's context window.
    ///
    /// Runtimes do not agree on an error code for this, so the message text is
    /// matched instead.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            LLMError::Generation(m) | LLMError::Stream(m) | LLMError::Api { message: m, .. } => {
                m.to_lowercase().contains("context")
            }
            _ => false,
        }
    }

    /// Message without the variant prefix
    pub fn detail(&self) -> String {
        match self {
            LLMError::Network(m)
            | LLMError::Stream(m)
            | LLMError::Config(m)
            | LLMError::Download(m)
            | LLMError::Prepare(m)
            | LLMError::Generation(m) => m.clone(),
            LLMError::Api { message, .. } => message.clone(),
            LLMError::ModelNotFound(id) => format!("model not found: {}", id),
            LLMError::Json(e) => e.to_string(),
        }
    }
}

impl From<reqwest::Error> for LLMError {
    fn from(e: reqwest::Error) -> Self {
        LLMError::Network(e.to_string())
    }
}

impl From<reqwest_middleware::Error> for LLMError {
    fn from(e: reqwest_middleware::Error) -> Self {
        LLMError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LLMError>;
