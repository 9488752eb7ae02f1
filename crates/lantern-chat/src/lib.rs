//! Chat session orchestration for on-device language models.
//!
//! A [`ChatSession`] ties three parts to one liveness token:
//!
//! - [`ModelLifecycleManager`] downloads, prepares and removes the selected model
//! - [`lantern_session::ConversationStore`] holds and persists the message log
//! - [`StreamingGenerationEngine`] runs a turn, coalescing streamed text and
//!   pruning context once when the model reports an overflow

pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod session;
pub mod settings;

pub use context::{build_context, prune_context, select_survivors, PruneReport};
pub use engine::{RejectReason, SendOutcome, StreamingGenerationEngine};
pub use error::{ChatError, Result};
pub use events::{EventSink, SessionEvent};
pub use lifecycle::{BorrowedModel, ModelLifecycleManager, SetupOutcome};
pub use session::{ChatSession, ChatSnapshot};
pub use settings::{ChatSettings, DEFAULT_FRAME_INTERVAL, KEEP_LATEST_CONTEXT_MESSAGES};
