//! Session runtime executor

use super::{RuntimeInput, SessionShared, SseEvent};

use crate::conversation::Message;
use crate::session::{ModelSession, SessionManager};
use crate::state_machine::{transition, ConvContext, ConvState, Effect, Event, TransitionError};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};

/// Drives one session: applies events through the state machine and
/// carries out the resulting effects
pub struct ConversationRuntime {
    context: ConvContext,
    state: ConvState,
    shared: Arc<SessionShared>,
    /// Held for the whole backend call, so sends never overlap
    manager: Arc<Mutex<SessionManager>>,
    event_rx: mpsc::Receiver<RuntimeInput>,
    /// Weak so the loop ends once every outside handle is dropped
    event_tx: mpsc::WeakSender<RuntimeInput>,
    broadcast_tx: broadcast::Sender<SseEvent>,
}

impl ConversationRuntime {
    pub fn new(
        context: ConvContext,
        shared: Arc<SessionShared>,
        manager: Arc<Mutex<SessionManager>>,
        event_rx: mpsc::Receiver<RuntimeInput>,
        event_tx: &mpsc::Sender<RuntimeInput>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        Self {
            context,
            state: ConvState::Idle,
            shared,
            manager,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            session_id = %self.context.session_id,
            model = %self.context.model_id,
            mode = self.context.mode.as_str(),
            "Starting session runtime"
        );

        // Process events in a loop - no recursion
        while let Some(input) = self.event_rx.recv().await {
            let (event, ack) = match input {
                RuntimeInput::Event(event) => (event, None),
                RuntimeInput::Submit { text, ack } => (Event::UserMessage { text }, Some(ack)),
            };

            let result = self.process_event(event).await;
            match &result {
                Err(TransitionError::InputRejected) => {
                    tracing::debug!(session_id = %self.context.session_id, "Ignoring blank input");
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.context.session_id, error = %e, "Event rejected");
                }
                Ok(()) => {}
            }
            if let Some(ack) = ack {
                let _ = ack.send(result);
            }
        }

        self.manager.lock().await.close();
        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(e @ TransitionError::InputRejected) => return Err(e),
                Err(e) => {
                    // User-facing, e.g. "still answering"
                    let _ = self.broadcast_tx.send(SseEvent::Error {
                        message: e.to_string(),
                        kind: None,
                    });
                    return Err(e);
                }
            };

            if result.new_state != self.state {
                tracing::debug!(
                    session_id = %self.context.session_id,
                    from = self.state.name(),
                    to = result.new_state.name(),
                    "State transition"
                );
            }
            self.state = result.new_state;
            *self.shared.state.write().await = self.state.clone();

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect).await {
                    events_to_process.push(generated_event);
                }
            }
        }

        Ok(())
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AppendMessage { role, content } => {
                let message = Message::new(role, content);
                self.shared
                    .conversation
                    .write()
                    .await
                    .append(message.clone());
                let _ = self.broadcast_tx.send(SseEvent::Message { message });
                None
            }

            Effect::PublishState => {
                let _ = self.broadcast_tx.send(SseEvent::StateChange {
                    state: self.state.clone(),
                });
                None
            }

            Effect::RequestReply { attempt } => {
                let Some(event_tx) = self.event_tx.upgrade() else {
                    tracing::debug!(session_id = %self.context.session_id, "Session gone, skipping reply");
                    return None;
                };
                let manager = Arc::clone(&self.manager);
                let shared = Arc::clone(&self.shared);
                let broadcast_tx = self.broadcast_tx.clone();
                let session_id = self.context.session_id.clone();

                tokio::spawn(async move {
                    let transcript = shared.messages().await;
                    let start = Instant::now();

                    let result = manager
                        .lock()
                        .await
                        .reply(&transcript, |fragment| {
                            let _ = broadcast_tx.send(SseEvent::Fragment {
                                text: fragment.to_string(),
                            });
                        })
                        .await;

                    let event = match result {
                        Ok(text) => {
                            tracing::info!(
                                session_id = %session_id,
                                attempt,
                                duration_ms = %start.elapsed().as_millis(),
                                "Reply received"
                            );
                            Event::ReplyReceived { text }
                        }
                        Err(e) => {
                            tracing::warn!(
                                session_id = %session_id,
                                attempt,
                                kind = ?e.kind,
                                error = %e.message,
                                "Reply failed"
                            );
                            Event::ReplyFailed {
                                message: e.message,
                                kind: e.kind,
                            }
                        }
                    };
                    let _ = event_tx.send(RuntimeInput::Event(event)).await;
                });

                // The event will come from the spawned task
                None
            }

            Effect::RecreateSession => {
                let Some(event_tx) = self.event_tx.upgrade() else {
                    return None;
                };
                let manager = Arc::clone(&self.manager);

                let session_id = self.context.session_id.clone();

                tokio::spawn(async move {
                    let mut manager = manager.lock().await;
                    let event = match manager.recreate().await {
                        Ok(()) => {
                            tracing::info!(
                                session_id = %session_id,
                                model_session = manager.session().map_or("", ModelSession::id),
                                creations = manager.creations(),
                                "Model session replaced"
                            );
                            Event::SessionRecreated
                        }
                        Err(e) => Event::SessionRecreateFailed {
                            message: e.message,
                            kind: e.kind,
                        },
                    };
                    let _ = event_tx.send(RuntimeInput::Event(event)).await;
                });

                None
            }

            Effect::NotifyTurnDone => {
                let _ = self.broadcast_tx.send(SseEvent::TurnDone);
                None
            }

            Effect::NotifyError { message, kind } => {
                let _ = self.broadcast_tx.send(SseEvent::Error {
                    message,
                    kind: Some(kind),
                });
                None
            }
        }
    }
}
