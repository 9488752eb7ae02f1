pub mod types;
pub mod chat;

pub use types::{
    Message,
    MessageId,
    Role,
    ChatMessage,
    ModelStatus,
    ModelLoadingState,
    ModelInfo,
    SortOrder,
};

pub use chat::{GenerationRequest, GenerationInput, GenerationOptions};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
