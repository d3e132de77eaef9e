//! Pure state transition function

use super::state::MAX_SEND_ATTEMPTS;
use super::{ConvContext, ConvState, Effect, Event};
use crate::llm::LlmErrorKind;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Message is empty")]
    InputRejected,
    #[error("Still answering the previous message")]
    AgentBusy,
    #[error("Session halted: {0}")]
    SessionHalted(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs. All I/O is
/// described by the returned effects.
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User input
        // ============================================================

        // Blank input is dropped before anything else looks at it
        (_, Event::UserMessage { text }) if text.trim().is_empty() => {
            Err(TransitionError::InputRejected)
        }

        (ConvState::Idle, Event::UserMessage { text }) => {
            Ok(TransitionResult::new(ConvState::Sending { attempt: 1 })
                .with_effect(Effect::append_user(text))
                .with_effect(Effect::PublishState)
                .with_effect(Effect::RequestReply { attempt: 1 }))
        }

        (ConvState::Sending { .. } | ConvState::Recovering { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::AgentBusy)
        }

        (ConvState::Halted { message }, Event::UserMessage { .. }) => {
            Err(TransitionError::SessionHalted(message.clone()))
        }

        // ============================================================
        // Backend replies
        // ============================================================

        (ConvState::Sending { .. }, Event::ReplyReceived { text }) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::append_assistant(text))
                .with_effect(Effect::PublishState)
                .with_effect(Effect::NotifyTurnDone))
        }

        (ConvState::Sending { attempt }, Event::ReplyFailed { message, kind }) => {
            Ok(handle_send_failure(*attempt, context, message, kind))
        }

        // ============================================================
        // Session recovery
        // ============================================================

        (ConvState::Recovering { attempt }, Event::SessionRecreated) => {
            let next = attempt + 1;
            Ok(TransitionResult::new(ConvState::Sending { attempt: next })
                .with_effect(Effect::PublishState)
                .with_effect(Effect::RequestReply { attempt: next }))
        }

        (ConvState::Recovering { .. }, Event::SessionRecreateFailed { message, kind }) => {
            if kind.is_fatal() {
                Ok(halt(message, kind))
            } else {
                Ok(fail_turn(
                    format!("Could not start a new session: {message}"),
                    kind,
                ))
            }
        }

        // ============================================================
        // Anything else is a stale or out-of-order event
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {state:?} with {event:?}"
        ))),
    }
}

fn handle_send_failure(
    attempt: u32,
    context: &ConvContext,
    message: String,
    kind: LlmErrorKind,
) -> TransitionResult {
    if kind.is_fatal() {
        return halt(message, kind);
    }

    if kind.is_session_invalid() && context.can_recreate() {
        if attempt < MAX_SEND_ATTEMPTS {
            return TransitionResult::new(ConvState::Recovering { attempt })
                .with_effect(Effect::PublishState)
                .with_effect(Effect::RecreateSession);
        }
        return fail_turn(
            format!("Session could not be recovered after {attempt} attempts: {message}"),
            kind,
        );
    }

    fail_turn(message, kind)
}

/// End the turn without a reply; the user may resubmit
fn fail_turn(message: String, kind: LlmErrorKind) -> TransitionResult {
    TransitionResult::new(ConvState::Idle)
        .with_effect(Effect::PublishState)
        .with_effect(Effect::notify_error(message, kind))
}

fn halt(message: String, kind: LlmErrorKind) -> TransitionResult {
    TransitionResult::new(ConvState::Halted {
        message: message.clone(),
    })
    .with_effect(Effect::PublishState)
    .with_effect(Effect::notify_error(message, kind))
}
