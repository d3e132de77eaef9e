//! API request and response types

use crate::conversation::Message;
use crate::state_machine::ConvState;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// False when the text was blank and nothing was sent
    pub queued: bool,
}

/// Response with a session and its transcript
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub mode: &'static str,
    pub messages: Vec<Message>,
    pub state: ConvState,
    pub agent_working: bool,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
