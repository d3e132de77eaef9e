//! Gemini chat sessions
//!
//! The REST API has no server-side chat object, so the handle carries the
//! accumulated turns and each send replays them behind the new user text.
//! Every handle is bound to a generation of the shared HTTP client. A
//! connection-level failure recycles the client, which invalidates every
//! handle created against the old one.

use super::{ModelSession, SessionBackend};
use crate::llm::{build_client, GeminiService, LlmError, LlmErrorKind, LlmMessage, LlmRequest, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::RwLock;

struct ClientSlot {
    generation: u64,
    client: Client,
}

pub struct GeminiChatBackend {
    api_key: String,
    base_url: Option<String>,
    timeout: Duration,
    ttl: Duration,
    slot: RwLock<ClientSlot>,
}

impl GeminiChatBackend {
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
        ttl: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            api_key: api_key.into(),
            base_url,
            timeout,
            ttl,
            slot: RwLock::new(ClientSlot {
                generation: 0,
                client: build_client(timeout)?,
            }),
        })
    }

    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    fn service(&self, client: Client, model_id: &str) -> GeminiService {
        GeminiService::new(client, &self.api_key, model_id, self.base_url.as_deref())
    }

    /// Replace the HTTP client unless someone already did since `seen`
    async fn recycle_client(&self, seen: u64) -> Result<(), LlmError> {
        let mut slot = self.slot.write().await;
        if slot.generation != seen {
            return Ok(());
        }
        slot.client = build_client(self.timeout)?;
        slot.generation += 1;
        tracing::warn!(generation = slot.generation, "Recycled backend HTTP client");
        Ok(())
    }

    /// Reason the handle cannot be used, if any
    async fn unusable(&self, session: &ModelSession) -> Option<&'static str> {
        if !session.is_valid() {
            return Some("Session was closed");
        }
        if session.idle_for() > self.ttl {
            return Some("Session expired");
        }
        if session.generation() != self.generation().await {
            return Some("Session is bound to a recycled client");
        }
        None
    }
}

#[async_trait]
impl SessionBackend for GeminiChatBackend {
    async fn create_session(
        &self,
        model_id: &str,
        system_instruction: &str,
    ) -> Result<ModelSession, LlmError> {
        let (generation, client) = {
            let slot = self.slot.read().await;
            (slot.generation, slot.client.clone())
        };

        self.service(client, model_id).verify_model().await?;
        Ok(ModelSession::new(model_id, system_instruction, generation))
    }

    async fn send(&self, session: &mut ModelSession, user_text: &str) -> Result<String, LlmError> {
        if let Some(reason) = self.unusable(session).await {
            session.invalidate();
            return Err(LlmError::session_invalid(reason));
        }

        let client = self.slot.read().await.client.clone();
        let mut messages = session.history().to_vec();
        messages.push(LlmMessage::user(user_text));
        let request = LlmRequest {
            system: Some(session.system_instruction().to_string()).filter(|s| !s.is_empty()),
            messages,
            max_tokens: None,
        };

        match self.service(client, session.model_id()).complete(&request).await {
            Ok(response) => {
                session.record_turn(user_text, &response.text);
                Ok(response.text)
            }
            Err(e) if e.kind == LlmErrorKind::Connection => {
                session.invalidate();
                self.recycle_client(session.generation()).await?;
                Err(LlmError::session_invalid(format!(
                    "Session connection lost: {}",
                    e.message
                )))
            }
            Err(e) => Err(e),
        }
    }
}
