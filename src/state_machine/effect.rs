//! Effects produced by state transitions

use crate::conversation::Role;
use crate::llm::LlmErrorKind;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append a message to the conversation and publish it
    AppendMessage { role: Role, content: String },

    /// Publish the new state to connected clients
    PublishState,

    /// Ask the session manager for a reply to the latest user message
    RequestReply { attempt: u32 },

    /// Replace the model session
    RecreateSession,

    /// The turn finished with a reply
    NotifyTurnDone,

    /// The turn finished without one
    NotifyError { message: String, kind: LlmErrorKind },
}

impl Effect {
    pub fn append_user(content: impl Into<String>) -> Self {
        Effect::AppendMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn append_assistant(content: impl Into<String>) -> Self {
        Effect::AppendMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn notify_error(message: impl Into<String>, kind: LlmErrorKind) -> Self {
        Effect::NotifyError {
            message: message.into(),
            kind,
        }
    }
}
