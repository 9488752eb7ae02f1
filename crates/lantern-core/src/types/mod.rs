pub mod message;
pub mod model;

pub use message::{new_message_id, ChatMessage, Message, MessageId, Role};
pub use model::{
    default_catalog, parse_size_to_bytes, sort_by_size, ModelInfo, ModelLoadingState,
    ModelStatus, SortOrder, MODEL_LIST_CACHE_KEY,
};
