//! Conversation state types

use crate::config::BackendMode;
use serde::{Deserialize, Serialize};

/// Send attempts allowed for one turn: the first send plus one retry on a
/// fresh session
pub const MAX_SEND_ATTEMPTS: u32 = 2;

// ============================================================================
// Conversation State
// ============================================================================

/// Conversation state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Ready for user input, no turn in flight
    #[default]
    Idle,

    /// Reply requested from the backend
    Sending { attempt: u32 },

    /// The session handle went bad during `attempt`; a fresh one is being
    /// created
    Recovering { attempt: u32 },

    /// Credential or model rejected by the backend. Input is refused until
    /// the session is ended.
    Halted { message: String },
}

impl ConvState {
    /// A turn is in flight
    pub fn is_working(&self) -> bool {
        matches!(self, ConvState::Sending { .. } | ConvState::Recovering { .. })
    }

    #[allow(dead_code)] // Used by tests
    pub fn is_halted(&self) -> bool {
        matches!(self, ConvState::Halted { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::Sending { .. } => "sending",
            ConvState::Recovering { .. } => "recovering",
            ConvState::Halted { .. } => "halted",
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Immutable facts about the session the transitions may consult
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub session_id: String,
    pub mode: BackendMode,
    pub model_id: String,
}

impl ConvContext {
    pub fn new(session_id: impl Into<String>, mode: BackendMode, model_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            mode,
            model_id: model_id.into(),
        }
    }

    /// Whether a dead session handle can be replaced and the send retried
    pub fn can_recreate(&self) -> bool {
        self.mode == BackendMode::Session
    }
}
