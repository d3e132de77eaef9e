//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::{SessionHandle, SessionRegistry, SseEvent};
use crate::conversation::{Message, Role};
use crate::llm::{
    build_client, GeminiService, LlmError, LlmErrorKind, LlmRequest, LlmResponse, LlmService,
    TextStream,
};
use crate::persona::PersonaSpec;
use crate::session::{Backend, ModelSession, SessionBackend};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Mock LLM Service
// ============================================================================

enum MockReply {
    Text(String),
    Fragments(Vec<String>),
    Error(LlmError),
}

/// Stateless service that returns queued replies
pub struct MockLlmService {
    replies: Mutex<VecDeque<MockReply>>,
    model_id: String,
    delay: Duration,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Hold every call for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn queue_text(&self, text: &str) {
        self.push(MockReply::Text(text.to_string()));
    }

    /// Queue a reply delivered in pieces when streamed
    pub fn queue_fragments(&self, fragments: &[&str]) {
        self.push(MockReply::Fragments(
            fragments.iter().map(ToString::to_string).collect(),
        ));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.push(MockReply::Error(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    async fn next(&self, request: &LlmRequest) -> MockReply {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockReply::Error(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let text = match self.next(request).await {
            MockReply::Text(text) => text,
            MockReply::Fragments(fragments) => fragments.concat(),
            MockReply::Error(e) => return Err(e),
        };
        Ok(LlmResponse {
            text,
            ..LlmResponse::default()
        })
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let fragments = match self.next(request).await {
            MockReply::Text(text) => vec![text],
            MockReply::Fragments(fragments) => fragments,
            MockReply::Error(e) => return Err(e),
        };
        Ok(futures::stream::iter(fragments.into_iter().map(Ok)).boxed())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Session Backend
// ============================================================================

/// Session backend with queued send results and create failures
#[derive(Default)]
pub struct MockSessionBackend {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    create_errors: Mutex<VecDeque<LlmError>>,
    creations: AtomicU32,
    sent: Mutex<Vec<String>>,
}

impl MockSessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_reply(&self, reply: Result<String, LlmError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Fail the next `create_session` call
    pub fn queue_create_error(&self, error: LlmError) {
        self.create_errors.lock().unwrap().push_back(error);
    }

    /// Number of `create_session` calls, failed ones included
    pub fn creations(&self) -> u32 {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionBackend for MockSessionBackend {
    async fn create_session(
        &self,
        model_id: &str,
        system_instruction: &str,
    ) -> Result<ModelSession, LlmError> {
        self.creations.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.create_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ModelSession::new(model_id, system_instruction, 0))
    }

    async fn send(&self, session: &mut ModelSession, user_text: &str) -> Result<String, LlmError> {
        assert!(session.is_valid(), "send on an invalid session");
        self.sent.lock().unwrap().push(user_text.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock reply queued")));
        if let Ok(text) = &reply {
            session.record_turn(user_text, text);
        }
        reply
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// How a turn ended, as seen by a subscribed client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Done,
    Failed {
        message: String,
        kind: Option<LlmErrorKind>,
    },
    TimedOut,
}

/// One registry, one session, one subscribed client
pub struct TestRuntime {
    pub registry: SessionRegistry,
    pub handle: SessionHandle,
    pub broadcast_rx: broadcast::Receiver<SseEvent>,
    /// Everything received by the `wait_*` helpers, in order
    pub seen: Vec<SseEvent>,
}

pub fn test_persona() -> PersonaSpec {
    PersonaSpec::builtin().unwrap()
}

impl TestRuntime {
    pub async fn session(backend: Arc<MockSessionBackend>) -> Self {
        Self::with_backend(Backend::Session(backend)).await
    }

    pub async fn stateless(service: Arc<MockLlmService>, streaming: bool) -> Self {
        Self::with_backend(Backend::Stateless { service, streaming }).await
    }

    pub async fn with_backend(backend: Backend) -> Self {
        let registry = SessionRegistry::new(backend, "test-model", &test_persona());
        let handle = registry.create().await;
        let broadcast_rx = handle.subscribe();
        Self {
            registry,
            handle,
            broadcast_rx,
            seen: Vec::new(),
        }
    }

    /// Submit input; rejections are ignored here and observed on the stream
    pub async fn send_message(&self, text: &str) {
        let _ = self.handle.submit(text).await;
    }

    /// Wait until the current turn reports done or an error
    pub async fn wait_for_turn_end(&mut self, timeout: Duration) -> TurnOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await {
                Ok(Ok(event)) => {
                    self.seen.push(event.clone());
                    match event {
                        SseEvent::TurnDone => return TurnOutcome::Done,
                        SseEvent::Error { message, kind } => {
                            return TurnOutcome::Failed { message, kind }
                        }
                        _ => continue,
                    }
                }
                _ => continue,
            }
        }
        TurnOutcome::TimedOut
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.handle.messages().await
    }

    pub fn fragments(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                SseEvent::Fragment { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

fn contents(messages: &[Message]) -> Vec<(Role, &str)> {
    messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_happy_path_three_entries() {
    let service = Arc::new(MockLlmService::new("test-model"));
    service.queue_text("Because of strong audit experience.");
    let mut rt = TestRuntime::stateless(service.clone(), false).await;

    rt.send_message("Why should I hire this candidate?").await;
    assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);

    let messages = rt.messages().await;
    let greeting = test_persona().greeting;
    assert_eq!(
        contents(&messages),
        vec![
            (Role::Assistant, greeting.as_str()),
            (Role::User, "Why should I hire this candidate?"),
            (Role::Assistant, "Because of strong audit experience."),
        ]
    );
    assert!(!rt.handle.state().await.is_working());
}

#[tokio::test]
async fn test_append_only_across_turns() {
    let service = Arc::new(MockLlmService::new("test-model"));
    for i in 0..3 {
        service.queue_text(&format!("answer {i}"));
    }
    let mut rt = TestRuntime::stateless(service.clone(), false).await;

    for i in 0..3 {
        rt.send_message(&format!("question {i}")).await;
        assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);
    }

    let messages = rt.messages().await;
    assert_eq!(messages.len(), 1 + 2 * 3);
    for i in 0..3 {
        assert_eq!(messages[1 + 2 * i].content, format!("question {i}"));
        assert_eq!(messages[2 + 2 * i].content, format!("answer {i}"));
    }

    // Each replay carries the whole transcript minus the greeting
    let requests = service.recorded_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].messages.len(), 5);
}

#[tokio::test]
async fn test_session_recovery_single_assistant_reply() {
    let backend = Arc::new(MockSessionBackend::new());
    backend.queue_reply(Err(LlmError::session_invalid("Session expired")));
    backend.queue_reply(Ok("Recovered answer".to_string()));
    let mut rt = TestRuntime::session(backend.clone()).await;

    rt.send_message("Why should I hire this candidate?").await;
    assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);

    let messages = rt.messages().await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[2].content, "Recovered answer");

    // Same user text went to both sessions
    assert_eq!(backend.creations(), 2);
    assert_eq!(
        backend.sent_texts(),
        vec!["Why should I hire this candidate?"; 2]
    );
}

#[tokio::test]
async fn test_bounded_retry_two_creations() {
    let backend = Arc::new(MockSessionBackend::new());
    backend.queue_reply(Err(LlmError::session_invalid("Session expired")));
    backend.queue_reply(Err(LlmError::session_invalid("Session expired again")));
    backend.queue_reply(Ok("never used".to_string()));
    let mut rt = TestRuntime::session(backend.clone()).await;

    rt.send_message("hello").await;
    let outcome = rt.wait_for_turn_end(WAIT).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed { kind: Some(LlmErrorKind::SessionInvalid), .. }
    ));

    // Give a stray third attempt the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.creations(), 2);
    assert_eq!(backend.sent_texts().len(), 2);

    let messages = rt.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::User);
}

#[tokio::test]
async fn test_failed_turn_keeps_user_message_only() {
    let service = Arc::new(MockLlmService::new("test-model"));
    service.queue_error(LlmError::server_error("Server error: overloaded"));
    service.queue_text("Second time lucky.");
    let mut rt = TestRuntime::stateless(service.clone(), false).await;

    rt.send_message("first").await;
    let outcome = rt.wait_for_turn_end(WAIT).await;
    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            message: "Server error: overloaded".to_string(),
            kind: Some(LlmErrorKind::ServerError),
        }
    );
    assert_eq!(rt.messages().await.len(), 2);

    // The next turn follows the orphaned user message
    rt.send_message("second").await;
    assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);
    let roles: Vec<Role> = rt.messages().await.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::Assistant, Role::User, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn test_transient_failure_not_retried_in_session_mode() {
    let backend = Arc::new(MockSessionBackend::new());
    backend.queue_reply(Err(LlmError::rate_limit("Rate limit exceeded: slow down")));
    let mut rt = TestRuntime::session(backend.clone()).await;

    rt.send_message("hello").await;
    assert!(matches!(
        rt.wait_for_turn_end(WAIT).await,
        TurnOutcome::Failed { kind: Some(LlmErrorKind::RateLimit), .. }
    ));
    assert_eq!(backend.creations(), 1);
    assert_eq!(backend.sent_texts().len(), 1);
}

#[tokio::test]
async fn test_fatal_failure_halts_session() {
    let backend = Arc::new(MockSessionBackend::new());
    backend.queue_create_error(LlmError::auth("Authentication failed: API key not valid"));
    let mut rt = TestRuntime::session(backend.clone()).await;

    rt.send_message("hello").await;
    assert!(matches!(
        rt.wait_for_turn_end(WAIT).await,
        TurnOutcome::Failed { kind: Some(LlmErrorKind::Auth), .. }
    ));
    assert!(rt.handle.state().await.is_halted());

    rt.send_message("anyone there?").await;
    let outcome = rt.wait_for_turn_end(WAIT).await;
    assert!(matches!(outcome, TurnOutcome::Failed { kind: None, .. }));
    assert_eq!(rt.messages().await.len(), 2);
    assert_eq!(backend.creations(), 1);
}

#[tokio::test]
async fn test_blocked_prompt_leaves_session_usable() {
    let mut server = mockito::Server::new_async().await;
    // Only the first request ends with the blocked text; the retry carries
    // it followed by the reworded question
    server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .match_body(mockito::Matcher::Regex(r#"xylophone secrets"\}\]"#.to_string()))
        .with_status(200)
        .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .match_body(mockito::Matcher::Regex("audit experience".to_string()))
        .with_status(200)
        .with_body(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Ten years of audits."}]},"finishReason":"STOP"}]}"#,
        )
        .create_async()
        .await;

    let gemini = GeminiService::new(
        build_client(Duration::from_secs(5)).unwrap(),
        "test-key",
        "gemini-2.5-flash",
        Some(&server.url()),
    );
    let mut rt = TestRuntime::with_backend(Backend::Stateless {
        service: Arc::new(gemini),
        streaming: false,
    })
    .await;

    rt.send_message("xylophone secrets").await;
    assert!(matches!(
        rt.wait_for_turn_end(WAIT).await,
        TurnOutcome::Failed { kind: Some(LlmErrorKind::ContentRejected), .. }
    ));
    assert!(!rt.handle.state().await.is_halted());

    rt.send_message("What is their audit experience?").await;
    assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);

    let messages = rt.messages().await;
    assert_eq!(
        contents(&messages)[1..],
        [
            (Role::User, "xylophone secrets"),
            (Role::User, "What is their audit experience?"),
            (Role::Assistant, "Ten years of audits."),
        ]
    );
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let service = Arc::new(MockLlmService::new("test-model"));
    service.queue_text("ok");
    let mut rt = TestRuntime::stateless(service.clone(), false).await;

    rt.send_message("   ").await;
    rt.send_message("").await;
    rt.send_message("real question").await;
    assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);

    assert_eq!(service.recorded_requests().len(), 1);
    assert_eq!(rt.messages().await.len(), 3);
    assert!(!rt
        .seen
        .iter()
        .any(|e| matches!(e, SseEvent::Error { .. })));
}

#[tokio::test]
async fn test_busy_session_rejects_second_message() {
    let service = Arc::new(MockLlmService::new("test-model").with_delay(Duration::from_millis(200)));
    service.queue_text("slow answer");
    let mut rt = TestRuntime::stateless(service.clone(), false).await;

    rt.send_message("first").await;
    rt.send_message("second").await;

    let outcome = rt.wait_for_turn_end(WAIT).await;
    assert!(matches!(outcome, TurnOutcome::Failed { kind: None, .. }));
    assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);

    let messages = rt.messages().await;
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.content != "second"));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let service = Arc::new(MockLlmService::new("test-model").with_delay(Duration::from_millis(100)));
    service.queue_text("reply one");
    service.queue_text("reply two");
    let mut rt = TestRuntime::stateless(service.clone(), false).await;

    let other = rt.registry.create().await;
    let mut other_rx = other.subscribe();

    // Both turns are in flight before either is awaited
    rt.send_message("same question").await;
    other.submit("same question").await.unwrap();

    let other_done = async {
        loop {
            match tokio::time::timeout(WAIT, other_rx.recv()).await {
                Ok(Ok(SseEvent::TurnDone)) => break true,
                Ok(Ok(_)) => continue,
                _ => break false,
            }
        }
    };
    let (first_outcome, second_done) = tokio::join!(rt.wait_for_turn_end(WAIT), other_done);
    assert_eq!(first_outcome, TurnOutcome::Done);
    assert!(second_done);

    let first = rt.messages().await;
    let second = other.messages().await;
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    assert_eq!(first[1].content, "same question");
    assert_eq!(second[1].content, "same question");

    let mut replies = vec![first[2].content.as_str(), second[2].content.as_str()];
    replies.sort_unstable();
    assert_eq!(replies, ["reply one", "reply two"]);

    // Neither replay saw the other session's turns
    let requests = service.recorded_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.messages.len() == 1));
    assert_ne!(rt.handle.id, other.id);
}

#[tokio::test]
async fn test_streaming_fragments_match_reply() {
    let service = Arc::new(MockLlmService::new("test-model"));
    service.queue_fragments(&["Because of ", "strong audit ", "experience."]);
    let mut rt = TestRuntime::stateless(service, true).await;

    rt.send_message("Why should I hire this candidate?").await;
    assert_eq!(rt.wait_for_turn_end(WAIT).await, TurnOutcome::Done);

    let messages = rt.messages().await;
    assert_eq!(rt.fragments().concat(), messages[2].content);
    assert_eq!(rt.fragments().len(), 3);
}

#[tokio::test]
async fn test_ended_session_is_forgotten() {
    let service = Arc::new(MockLlmService::new("test-model"));
    let rt = TestRuntime::stateless(service, false).await;
    let id = rt.handle.id.clone();

    assert_eq!(rt.registry.count().await, 1);
    assert!(rt.registry.end(&id).await);
    assert!(rt.registry.get(&id).await.is_none());
    assert!(!rt.registry.end(&id).await);
}

#[tokio::test]
async fn test_idle_sessions_are_evicted() {
    let service: Arc<MockLlmService> = Arc::new(MockLlmService::new("test-model"));
    let registry = SessionRegistry::new(
        Backend::Stateless {
            service,
            streaming: false,
        },
        "test-model",
        &test_persona(),
    )
    .with_idle_ttl(Duration::from_millis(20));

    let abandoned = registry.create().await;
    let watched = registry.create().await;
    let _stream = watched.subscribe();
    let returning = registry.create().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    returning.touch().await;

    assert_eq!(registry.evict_idle().await, 1);
    assert!(registry.get(&abandoned.id).await.is_none());
    assert!(registry.get(&watched.id).await.is_some());
    assert!(registry.get(&returning.id).await.is_some());
}

#[tokio::test]
async fn test_idle_sweeper_empties_registry() {
    let service: Arc<MockLlmService> = Arc::new(MockLlmService::new("test-model"));
    let registry = Arc::new(
        SessionRegistry::new(
            Backend::Stateless {
                service,
                streaming: false,
            },
            "test-model",
            &test_persona(),
        )
        .with_idle_ttl(Duration::from_millis(10)),
    );
    registry.create().await;
    registry.create().await;

    registry.start_idle_sweeper(Duration::from_millis(10));

    let deadline = tokio::time::Instant::now() + WAIT;
    while registry.count().await > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.count().await, 0);
}

#[tokio::test]
async fn test_greeting_seeded_once_per_session() {
    let service = Arc::new(MockLlmService::new("test-model"));
    let rt = TestRuntime::stateless(service, false).await;

    let messages = rt.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].content, test_persona().greeting);
}
