//! HTTP API
//!
//! The embedded chat page, session endpoints, and one SSE stream per session.

mod assets;
mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::persona::PersonaSpec;
use crate::runtime::SessionRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub persona: Arc<PersonaSpec>,
}

impl AppState {
    pub fn new(sessions: SessionRegistry, persona: PersonaSpec) -> Self {
        Self {
            sessions: Arc::new(sessions),
            persona: Arc::new(persona),
        }
    }
}
