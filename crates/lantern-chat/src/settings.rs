use lantern_session::{ConversationStoreConfig, DEFAULT_SUMMARY_PROMPT, DEFAULT_SUMMARY_TURNS};
use std::time::Duration;

/// Prior messages kept, besides the current user turn, when context is pruned
pub const KEEP_LATEST_CONTEXT_MESSAGES: usize = 3;

/// Minimum spacing between streamed text updates
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Behaviour knobs for a chat session
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Send conversation history with each turn instead of the bare prompt
    pub use_context_history: bool,
    pub keep_latest_context_messages: usize,
    pub frame_interval: Duration,
    pub summary_turns: usize,
    pub summary_prompt: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            use_context_history: true,
            keep_latest_context_messages: KEEP_LATEST_CONTEXT_MESSAGES,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            summary_turns: DEFAULT_SUMMARY_TURNS,
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

impl ChatSettings {
    pub fn with_context_history(mut self, enabled: bool) -> Self {
        self.use_context_history = enabled;
        self
    }

    pub fn with_keep_latest(mut self, count: usize) -> Self {
        self.keep_latest_context_messages = count;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn conversation_config(&self) -> ConversationStoreConfig {
        ConversationStoreConfig::default()
            .with_summary_turns(self.summary_turns)
            .with_summary_prompt(self.summary_prompt.clone())
    }
}
