//! Events that can occur in a conversation

use crate::llm::LlmErrorKind;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },

    // Backend events
    ReplyReceived {
        text: String,
    },
    ReplyFailed {
        message: String,
        kind: LlmErrorKind,
    },

    // Session lifecycle events (session mode only)
    SessionRecreated,
    SessionRecreateFailed {
        message: String,
        kind: LlmErrorKind,
    },
}
