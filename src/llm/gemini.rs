//! Google Gemini provider implementation
//!
//! Complete replies go through `:generateContent`, incremental replies through
//! `:streamGenerateContent?alt=sse`. The key travels in the `x-goog-api-key`
//! header so it never shows up in URLs or transport error messages.

use super::types::{LlmMessage, LlmRequest, LlmResponse, MessageRole, TextStream, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Build the HTTP client shared by every Gemini call
pub fn build_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))
}

/// Gemini service implementation
#[derive(Clone)]
pub struct GeminiService {
    client: Client,
    api_key: String,
    model_id: String,
    base_url: String,
}

impl GeminiService {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        model_id: impl Into<String>,
        base_url: Option<&str>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model_id: model_id.into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model_id)
    }

    /// Confirm the key is accepted and the model exists. Sends no chat content.
    pub async fn verify_model(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(self.model_url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status.as_u16(), &body, retry_after))
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_instruction = request.system.as_ref().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(text.clone()),
            }],
        });

        GeminiRequest {
            contents: merge_turns(&request.messages),
            system_instruction,
            generation_config: request.max_tokens.map(|max| GeminiGenerationConfig {
                max_output_tokens: Some(max),
            }),
        }
    }

    fn normalize_response(resp: GeminiResponse) -> Result<LlmResponse, LlmError> {
        if let Some(reason) = resp.block_reason() {
            return Err(LlmError::content_rejected(format!("Prompt blocked: {reason}")));
        }

        let usage = resp
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                input_tokens: u64::from(u.prompt_token_count),
                output_tokens: u64::from(u.candidates_token_count),
            })
            .unwrap_or_default();

        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No candidates in response"))?;

        let text = candidate.text();
        if text.is_empty() {
            return Err(LlmError::unknown(format!(
                "Empty response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        Ok(LlmResponse {
            text,
            finish_reason: candidate.finish_reason,
            usage,
        })
    }

    async fn post(&self, url: &str, request: &LlmRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&Self::translate_request(request))
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = retry_after(&response);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        Err(error_from_body(status.as_u16(), &body, retry_after))
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}:generateContent", self.model_url());
        let response = self.post(&url, request).await?;

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(gemini_response)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let url = format!("{}:streamGenerateContent?alt=sse", self.model_url());
        let response = self.post(&url, request).await?;
        Ok(sse_fragments(response.bytes_stream()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Collapse consecutive same-role messages into one content entry
fn merge_turns(messages: &[LlmMessage]) -> Vec<GeminiContent> {
    let mut contents: Vec<GeminiContent> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "model",
        };

        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => {
                last.parts.push(GeminiPart {
                    text: Some(msg.text.clone()),
                });
            }
            _ => contents.push(GeminiContent {
                role: Some(role.to_string()),
                parts: vec![GeminiPart {
                    text: Some(msg.text.clone()),
                }],
            }),
        }
    }

    contents
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn error_from_body(status: u16, body: &str, retry_after: Option<Duration>) -> LlmError {
    let error = match serde_json::from_str::<GeminiErrorResponse>(body) {
        Ok(resp) => resp.error.classify(status),
        Err(_) => LlmError::from_status(status, body.trim()),
    };
    match retry_after {
        Some(delay) => error.with_retry_after(delay),
        None => error,
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Splits a byte stream into lines, tolerating chunks that end mid-line or
/// mid-character.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        Some(line)
    }
}

/// Decode one SSE line into a fragment, if it carries one
fn parse_sse_line(line: &str) -> Option<Result<String, LlmError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }

    if let Ok(error) = serde_json::from_str::<GeminiErrorResponse>(data) {
        let status = error.error.code.and_then(|c| u16::try_from(c).ok()).unwrap_or(0);
        return Some(Err(error.error.classify(status)));
    }

    let chunk: GeminiResponse = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Some(Err(LlmError::unknown(format!(
                "Failed to parse stream chunk: {e} - data: {data}"
            ))))
        }
    };

    if let Some(reason) = chunk.block_reason() {
        return Some(Err(LlmError::content_rejected(format!("Prompt blocked: {reason}"))));
    }

    let text: String = chunk.candidates.iter().map(GeminiCandidate::text).collect();
    if text.is_empty() {
        None
    } else {
        Some(Ok(text))
    }
}

struct SseState<S> {
    body: S,
    lines: LineBuffer,
    ready: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

/// Turn an SSE response body into reply fragments. The stream ends after the
/// body ends or after the first error.
fn sse_fragments<S, B>(body: S) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        lines: LineBuffer::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                if item.is_err() {
                    state.ready.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let parsed = state
                        .lines
                        .feed(chunk.as_ref())
                        .iter()
                        .filter_map(|line| parse_sse_line(line))
                        .collect::<Vec<_>>();
                    state.ready.extend(parsed);
                }
                Some(Err(e)) => {
                    state.ready.push_back(Err(LlmError::from_transport(&e)));
                }
                None => {
                    state.finished = true;
                    if let Some(item) = state.lines.finish().as_deref().and_then(parse_sse_line) {
                        state.ready.push_back(item);
                    }
                }
            }
        }
    })
    .boxed()
}

// ============================================================================
// Gemini API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

impl GeminiResponse {
    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

impl GeminiCandidate {
    fn text(&self) -> String {
        self.content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    code: Option<i64>,
    #[serde(default)]
    details: Vec<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    reason: Option<String>,
}

impl GeminiError {
    /// Gemini answers a bad API key with 400, not 401
    fn classify(&self, status: u16) -> LlmError {
        let bad_key = self
            .details
            .iter()
            .any(|d| d.reason.as_deref() == Some("API_KEY_INVALID"));
        if bad_key {
            LlmError::auth(format!("Authentication failed: {}", self.message))
        } else {
            LlmError::from_status(status, &self.message)
        }
    }
}
