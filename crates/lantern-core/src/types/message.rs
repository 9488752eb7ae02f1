use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Unique message identifier
pub type MessageId = String;

/// Speaker of a message as seen by the model runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of a conversation.
///
/// The serialized form is the persisted record layout:
/// `{ id, text, isUser, timestamp, includeInContext, remainTokens? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    /// Records written before the flag existed (or with `null`) count as included.
    #[serde(default = "included_by_default", deserialize_with = "deserialize_include_flag")]
    pub include_in_context: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remain_tokens: Option<usize>,
}

fn included_by_default() -> bool {
    true
}

fn deserialize_include_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

/// Generate a message id from the creation time plus a random suffix.
pub fn new_message_id() -> MessageId {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        &Uuid::new_v4().simple().to_string()[..9]
    )
}

impl Message {
    fn new(text: impl Into<String>, is_user: bool) -> Self {
        Self {
            id: new_message_id(),
            text: text.into(),
            is_user,
            timestamp: Utc::now(),
            include_in_context: true,
            remain_tokens: None,
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(text, false)
    }

    /// Empty assistant message that streamed output is written into
    pub fn placeholder() -> Self {
        Self::new(String::new(), false)
    }

    pub fn role(&self) -> Role {
        if self.is_user {
            Role::User
        } else {
            Role::Assistant
        }
    }

    /// Whether the message carries any non-whitespace text
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Text length counted in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role(),
            content: self.text.clone(),
        }
    }
}

/// A `{ role, content }` pair handed to the model runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        message.to_chat_message()
    }
}
