use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

/// What the model is asked to continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationInput {
    /// Chronological role-tagged history ending with the current user turn
    Messages { messages: Vec<ChatMessage> },
    /// A single prompt with no history
    Prompt { prompt: String },
}

/// Generation request handed to a prepared model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub input: GenerationInput,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl GenerationRequest {
    /// Request built from conversation history
    pub fn messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            input: GenerationInput::Messages { messages },
            options: GenerationOptions::default(),
        }
    }

    /// Request built from a bare prompt
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            input: GenerationInput::Prompt {
                prompt: prompt.into(),
            },
            options: GenerationOptions::default(),
        }
    }

    /// Set options
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Set temperature
    pub fn temperature(mut self, temp: f32) -> Self {
        self.options.temperature = Some(temp);
        self
    }

    /// Set max tokens
    pub fn max_tokens(mut self, max: u32) -> Self {
        self.options.max_tokens = Some(max);
        self
    }

    /// Number of history messages, or 0 for a prompt request
    pub fn message_count(&self) -> usize {
        match &self.input {
            GenerationInput::Messages { messages } => messages.len(),
            GenerationInput::Prompt { .. } => 0,
        }
    }

    pub fn as_messages(&self) -> Option<&[ChatMessage]> {
        match &self.input {
            GenerationInput::Messages { messages } => Some(messages),
            GenerationInput::Prompt { .. } => None,
        }
    }
}

/// Sampling options forwarded to the runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set temperature (0.0 - 2.0)
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set top_p (0.0 - 1.0)
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_tokens.is_none() && self.top_p.is_none()
    }
}
