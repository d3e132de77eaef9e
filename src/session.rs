//! Model session management
//!
//! Owns the logical connection to the backend for one chat. In session mode
//! that is an explicit `ModelSession` handle, created lazily and replaced
//! when the backend reports it unusable. In stateless mode there is no
//! handle and every call replays the whole transcript.

mod gemini;

pub use gemini::GeminiChatBackend;

use crate::config::BackendMode;
use crate::conversation::{last_user_text, Message};
use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmService};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handle to an established conversation context on the backend
#[derive(Debug, Clone)]
pub struct ModelSession {
    id: String,
    model_id: String,
    system_instruction: String,
    generation: u64,
    created_at: Instant,
    last_used: Instant,
    valid: bool,
    history: Vec<LlmMessage>,
}

impl ModelSession {
    pub fn new(model_id: &str, system_instruction: &str, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            system_instruction: system_instruction.to_string(),
            generation,
            created_at: now,
            last_used: now,
            valid: true,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Client generation this handle was created against
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Turns the handle has accumulated, oldest first
    pub fn history(&self) -> &[LlmMessage] {
        &self.history
    }

    /// Record a completed exchange
    pub fn record_turn(&mut self, user_text: &str, reply: &str) {
        self.history.push(LlmMessage::user(user_text));
        self.history.push(LlmMessage::assistant(reply));
        self.last_used = Instant::now();
    }
}

/// Backend that keeps conversation context behind a session handle
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Establish a handle bound to the persona. Sends no chat message.
    async fn create_session(
        &self,
        model_id: &str,
        system_instruction: &str,
    ) -> Result<ModelSession, LlmError>;

    /// Send only the new user text and return the full reply
    async fn send(&self, session: &mut ModelSession, user_text: &str) -> Result<String, LlmError>;

    fn close(&self, session: &mut ModelSession) {
        session.invalidate();
    }
}

/// The backend a deployment talks to
#[derive(Clone)]
pub enum Backend {
    Session(Arc<dyn SessionBackend>),
    Stateless {
        service: Arc<dyn LlmService>,
        streaming: bool,
    },
}

impl Backend {
    pub fn mode(&self) -> BackendMode {
        match self {
            Self::Session(_) => BackendMode::Session,
            Self::Stateless { .. } => BackendMode::Stateless,
        }
    }
}

/// Per-chat owner of the backend connection
pub struct SessionManager {
    backend: Backend,
    model_id: String,
    system_instruction: Arc<str>,
    session: Option<ModelSession>,
    creations: u32,
}

impl SessionManager {
    pub fn new(backend: Backend, model_id: impl Into<String>, system_instruction: Arc<str>) -> Self {
        Self {
            backend,
            model_id: model_id.into(),
            system_instruction,
            session: None,
            creations: 0,
        }
    }

    /// Number of session creations attempted so far
    pub fn creations(&self) -> u32 {
        self.creations
    }

    pub fn session(&self) -> Option<&ModelSession> {
        self.session.as_ref()
    }

    /// Create a session unless a valid one is already held
    pub async fn ensure_session(&mut self) -> Result<(), LlmError> {
        if self.session.as_ref().is_some_and(ModelSession::is_valid) {
            return Ok(());
        }
        self.create().await
    }

    /// Close the current handle, if any, and create a fresh one
    pub async fn recreate(&mut self) -> Result<(), LlmError> {
        let Backend::Session(backend) = &self.backend else {
            tracing::debug!(model = %self.model_id, "Stateless backend has no session to recreate");
            return Ok(());
        };
        if let Some(mut old) = self.session.take() {
            backend.close(&mut old);
            tracing::info!(session = %old.id(), age_ms = %old.age().as_millis(), "Closed model session");
        }
        self.create().await
    }

    async fn create(&mut self) -> Result<(), LlmError> {
        let Backend::Session(backend) = &self.backend else {
            return Ok(());
        };
        self.session = None;
        self.creations += 1;

        match backend
            .create_session(&self.model_id, &self.system_instruction)
            .await
        {
            Ok(session) => {
                tracing::info!(
                    session = %session.id(),
                    model = %self.model_id,
                    creations = self.creations,
                    "Created model session"
                );
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    model = %self.model_id,
                    creations = self.creations,
                    error = %e.message,
                    kind = ?e.kind,
                    "Model session creation failed"
                );
                Err(e)
            }
        }
    }

    /// Produce the assistant reply for the latest user message.
    ///
    /// Session mode sends only the latest user text through the held handle.
    /// Stateless mode replays `transcript`; with streaming on, each fragment
    /// is handed to `on_fragment` as it arrives.
    pub async fn reply(
        &mut self,
        transcript: &[Message],
        mut on_fragment: impl FnMut(&str) + Send,
    ) -> Result<String, LlmError> {
        match self.backend.clone() {
            Backend::Session(backend) => {
                let text = last_user_text(transcript)
                    .ok_or_else(|| LlmError::invalid_request("No user message to send"))?;

                self.ensure_session().await?;
                let Some(session) = self.session.as_mut() else {
                    return Err(LlmError::session_invalid("No model session available"));
                };

                let result = backend.send(session, text).await;
                if let Err(e) = &result {
                    if e.kind.is_session_invalid() {
                        if let Some(mut dead) = self.session.take() {
                            backend.close(&mut dead);
                        }
                    }
                }
                result
            }
            Backend::Stateless { service, streaming } => {
                let request = LlmRequest::from_transcript(&self.system_instruction, transcript);

                let reply = if streaming {
                    let mut fragments = service.stream(&request).await?;
                    let mut reply = String::new();
                    while let Some(fragment) = fragments.next().await {
                        let fragment = fragment?;
                        on_fragment(&fragment);
                        reply.push_str(&fragment);
                    }
                    reply
                } else {
                    service.complete(&request).await?.text
                };

                if reply.is_empty() {
                    return Err(LlmError::unknown("Backend returned an empty reply"));
                }
                Ok(reply)
            }
        }
    }

    /// Release the handle when the chat ends
    pub fn close(&mut self) {
        if let (Backend::Session(backend), Some(mut session)) = (&self.backend, self.session.take())
        {
            backend.close(&mut session);
        }
    }
}
