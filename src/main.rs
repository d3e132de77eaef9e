//! Advocate Chat - a persona chat page that argues for a job candidate
//!
//! One web process, one runtime per visitor session, a hosted Gemini model
//! behind it.

mod api;
mod config;
mod conversation;
mod llm;
mod persona;
mod runtime;
mod session;
mod state_machine;

use api::{create_router, AppState};
use config::{resolve_credential, AppConfig, BackendMode, ConfigurationError};
use llm::{build_client, GeminiService, LoggingService};
use persona::PersonaSpec;
use runtime::SessionRegistry;
use session::{Backend, GeminiChatBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often abandoned sessions are looked for
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "advocate_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration problems stop the process before it listens
    let (config, persona, backend) = match startup() {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(error = %e, "Startup configuration failed");
            return Err(e.into());
        }
    };

    tracing::info!(
        model = %config.model_id,
        mode = config.backend_mode.as_str(),
        streaming = config.streaming,
        persona = %persona.bot_name,
        "Backend configured"
    );

    let registry = SessionRegistry::new(backend, &config.model_id, &persona)
        .with_idle_ttl(config.session_ttl);
    let state = AppState::new(registry, persona);
    state.sessions.start_idle_sweeper(SWEEP_INTERVAL);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Advocate chat listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Read settings, the credential, and the persona, then build the backend
fn startup() -> Result<(AppConfig, PersonaSpec, Backend), ConfigurationError> {
    let config = AppConfig::from_env()?;
    let credential = resolve_credential(&config.secret_store()?)?;
    let persona = PersonaSpec::load_or_builtin(config.persona_path.as_deref())?;

    let backend_error = |e: llm::LlmError| ConfigurationError::BackendClient(e.message);

    let backend = match config.backend_mode {
        BackendMode::Session => Backend::Session(Arc::new(
            GeminiChatBackend::new(
                credential.expose(),
                config.base_url.clone(),
                config.llm_timeout,
                config.session_ttl,
            )
            .map_err(backend_error)?,
        )),
        BackendMode::Stateless => {
            let client = build_client(config.llm_timeout).map_err(backend_error)?;
            let gemini = GeminiService::new(
                client,
                credential.expose(),
                &config.model_id,
                config.base_url.as_deref(),
            );
            Backend::Stateless {
                service: Arc::new(LoggingService::new(Arc::new(gemini))),
                streaming: config.streaming,
            }
        }
    };

    Ok((config, persona, backend))
}
