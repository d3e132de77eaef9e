//! Per-session conversation transcript
//!
//! Append-only and owned by exactly one session runtime. Role order is not
//! enforced: a failed turn leaves its user message behind and the next turn
//! appends another user message after it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    #[allow(dead_code)] // Used by tests
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    seeded: bool,
}

impl Conversation {
    /// Install the opening messages. Only the first call has any effect.
    ///
    /// Returns whether the seed was applied.
    pub fn seed(&mut self, initial: impl IntoIterator<Item = Message>) -> bool {
        if self.seeded {
            return false;
        }
        self.seeded = true;
        self.messages.extend(initial);
        true
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Copy of the transcript as of now
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    #[allow(dead_code)] // Used by tests
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[allow(dead_code)] // Used by tests
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text of the most recent user message
    #[allow(dead_code)] // Used by tests
    pub fn last_user_text(&self) -> Option<&str> {
        last_user_text(&self.messages)
    }
}

pub fn last_user_text(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}
