//! Remote language model access
//!
//! One trait for stateless completion, one provider behind it.

mod error;
mod gemini;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use gemini::{build_client, GeminiService};
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Same request, delivered as fragments. Concatenated fragments equal
    /// what `complete` would have returned.
    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let response = self.complete(request).await?;
        Ok(futures::stream::once(async move { Ok(response.text) }).boxed())
    }

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    finish_reason = ?response.finish_reason,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    transient = e.kind.is_transient(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let start = Instant::now();
        let result = self.inner.stream(request).await;

        match &result {
            Ok(_) => tracing::info!(
                model = %self.model_id,
                first_byte_ms = %start.elapsed().as_millis(),
                messages = request.messages.len(),
                "LLM stream opened"
            ),
            Err(e) => tracing::error!(
                model = %self.model_id,
                duration_ms = %start.elapsed().as_millis(),
                error = %e.message,
                kind = ?e.kind,
                "LLM stream failed to open"
            ),
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
