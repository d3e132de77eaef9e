//! Per-session runtimes
//!
//! Every chat session gets its own executor task that owns the turn state
//! and is the only writer of its conversation. The registry hands out
//! handles for sending events and subscribing to updates.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;

use crate::config::BackendMode;
use crate::conversation::{Conversation, Message};
use crate::llm::LlmErrorKind;
use crate::persona::PersonaSpec;
use crate::session::{Backend, SessionManager};
use crate::state_machine::{ConvContext, ConvState, Event, TransitionError};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};

/// Sessions nobody has touched for this long are ended by the sweeper
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        messages: Vec<Message>,
        state: ConvState,
        agent_working: bool,
    },
    Message {
        message: Message,
    },
    /// Partial reply text, streaming mode only
    Fragment {
        text: String,
    },
    StateChange {
        state: ConvState,
    },
    TurnDone,
    Error {
        message: String,
        kind: Option<LlmErrorKind>,
    },
}

/// What a session runtime's queue carries
#[derive(Debug)]
pub enum RuntimeInput {
    /// Outcome of work the runtime spawned
    Event(Event),
    /// User input; the runtime reports whether it was accepted
    Submit {
        text: String,
        ack: oneshot::Sender<Result<(), TransitionError>>,
    },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Session runtime has stopped")]
    Closed,
}

/// Session data readable outside the executor
#[derive(Debug)]
pub struct SessionShared {
    conversation: RwLock<Conversation>,
    state: RwLock<ConvState>,
    last_activity: RwLock<Instant>,
}

impl Default for SessionShared {
    fn default() -> Self {
        Self {
            conversation: RwLock::default(),
            state: RwLock::default(),
            last_activity: RwLock::new(Instant::now()),
        }
    }
}

impl SessionShared {
    pub async fn messages(&self) -> Vec<Message> {
        self.conversation.read().await.snapshot()
    }

    pub async fn state(&self) -> ConvState {
        self.state.read().await.clone()
    }

    async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    async fn idle_for(&self) -> Duration {
        self.last_activity.read().await.elapsed()
    }
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub event_tx: mpsc::Sender<RuntimeInput>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Hand user input to the runtime and wait for its verdict. `Ok`
    /// means the turn has started; the reply arrives over the stream.
    pub async fn submit(&self, text: impl Into<String>) -> Result<(), SubmitError> {
        self.shared.touch().await;
        let (ack, verdict) = oneshot::channel();
        self.event_tx
            .send(RuntimeInput::Submit {
                text: text.into(),
                ack,
            })
            .await
            .map_err(|_| SubmitError::Closed)?;
        verdict.await.map_err(|_| SubmitError::Closed)??;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SseEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Record client activity that sends no event (page load, reconnect)
    pub async fn touch(&self) {
        self.shared.touch().await;
    }

    /// No open stream, no turn in flight, and quiet for longer than `ttl`
    pub async fn is_idle(&self, ttl: Duration) -> bool {
        self.broadcast_tx.receiver_count() == 0
            && !self.state().await.is_working()
            && self.shared.idle_for().await > ttl
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.shared.messages().await
    }

    pub async fn state(&self) -> ConvState {
        self.shared.state().await
    }

    /// Snapshot for a newly connected client
    pub async fn init_event(&self) -> SseEvent {
        let state = self.state().await;
        SseEvent::Init {
            messages: self.messages().await,
            agent_working: state.is_working(),
            state,
        }
    }
}

/// Manager for all session runtimes
pub struct SessionRegistry {
    backend: Backend,
    model_id: String,
    system_instruction: Arc<str>,
    greeting: String,
    idle_ttl: Duration,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(backend: Backend, model_id: impl Into<String>, persona: &PersonaSpec) -> Self {
        Self {
            backend,
            model_id: model_id.into(),
            system_instruction: Arc::from(persona.system_instruction()),
            greeting: persona.greeting.clone(),
            idle_ttl: DEFAULT_IDLE_TTL,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Start a session seeded with the persona greeting
    pub async fn create(&self) -> SessionHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let context = ConvContext::new(&id, self.backend.mode(), &self.model_id);

        let shared = Arc::new(SessionShared::default());
        let seeded = {
            let mut conversation = shared.conversation.write().await;
            conversation.seed([Message::assistant(&self.greeting)]);
            conversation.len()
        };

        let manager = SessionManager::new(
            self.backend.clone(),
            &self.model_id,
            Arc::clone(&self.system_instruction),
        );

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(256);

        let runtime = ConversationRuntime::new(
            context,
            Arc::clone(&shared),
            Arc::new(Mutex::new(manager)),
            event_rx,
            &event_tx,
            broadcast_tx.clone(),
        );

        let session_id = id.clone();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(session_id = %session_id, "Session runtime finished");
        });

        let handle = SessionHandle {
            id: id.clone(),
            event_tx,
            broadcast_tx,
            shared,
        };
        self.sessions.write().await.insert(id.clone(), handle.clone());
        tracing::info!(
            session_id = %id,
            mode = self.backend.mode().as_str(),
            messages = seeded,
            "Session started"
        );

        handle
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Forget the session. Its runtime stops once the last handle is gone
    /// and any in-flight turn has finished.
    pub async fn end(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            tracing::info!(session_id = %session_id, "Session ended");
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// End every session that has gone idle. Returns how many were ended.
    pub async fn evict_idle(&self) -> usize {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();

        let mut evicted = 0;
        for handle in handles {
            if handle.is_idle(self.idle_ttl).await && self.end(&handle.id).await {
                evicted += 1;
            }
        }
        evicted
    }

    /// Periodically evict idle sessions. Stops once the registry is dropped.
    pub fn start_idle_sweeper(self: &Arc<Self>, every: Duration) {
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle().await;
                if evicted > 0 {
                    let remaining = registry.count().await;
                    tracing::info!(
                        evicted,
                        remaining,
                        "Evicted idle sessions"
                    );
                }
            }
        });
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }
}
