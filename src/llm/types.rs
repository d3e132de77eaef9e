//! Common types for LLM interactions

use super::LlmError;
use crate::conversation::{Message, Role};
use futures::stream::BoxStream;

/// Lazy, finite, non-restartable sequence of reply fragments
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// LLM request
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Build a replay request from a transcript.
    ///
    /// Assistant messages ahead of the first user message (the greeting) are
    /// dropped: the backend expects contents to open with a user turn.
    pub fn from_transcript(system: &str, transcript: &[Message]) -> Self {
        let messages = transcript
            .iter()
            .skip_while(|m| m.role == Role::Assistant)
            .map(LlmMessage::from)
            .collect();

        Self {
            system: Some(system.to_string()).filter(|s| !s.is_empty()),
            messages,
            max_tokens: None,
        }
    }
}

/// Message in conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub text: String,
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
        }
    }
}

impl From<&Message> for LlmMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        };
        Self {
            role,
            text: message.content.clone(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

/// LLM response
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
