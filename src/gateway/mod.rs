//! Axum-based HTTP gateway.
//!
//! Three routes: the fire-and-forget webhook intake, the cache-invalidation
//! refresh hook, and a health probe. The router carries a request body limit
//! and a request timeout so oversized or slow-loris requests cannot tie up
//! the service.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use handlers::{handle_health, handle_refresh, handle_webhook};

use crate::agent::OpenAiAgent;
use crate::config::Config;
use crate::datasource::DataSource;
use crate::dispatch::DispatchQueue;
use crate::handler::ConversationHandler;
use crate::session::SessionStore;
use crate::transport::TwilioTransport;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s) — prevents slow-loris attacks
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ConversationHandler>,
    pub queue: DispatchQueue,
    pub datasource: Arc<DataSource>,
    pub refresh_token: Option<Arc<str>>,
    pub notify_after: Duration,
    pub model: String,
}

/// Wire up every component from config and run the HTTP gateway.
pub async fn run_gateway(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    run_gateway_with_listener(listener, config).await
}

/// Run the HTTP gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    listener: tokio::net::TcpListener,
    config: Config,
) -> Result<()> {
    let display_addr = listener.local_addr()?;

    let transport = Arc::new(TwilioTransport::new(
        config.secrets.twilio_account_sid.clone(),
        config.secrets.twilio_auth_token.clone(),
        &config.secrets.twilio_from,
        config.dispatch.send_timeout(),
    ));
    let (queue, worker) = DispatchQueue::start(transport, config.dispatch.clone());

    let sessions = Arc::new(SessionStore::new(config.conversation.history_cap));
    let datasource = Arc::new(DataSource::new(config.agent.source_url.clone()));
    let agent = Arc::new(OpenAiAgent::new(
        &config.secrets.openai_api_key,
        config.agent.model.clone(),
        config.agent.temperature,
    ));
    let handler = Arc::new(ConversationHandler::new(
        sessions,
        agent,
        Arc::clone(&datasource),
        queue.clone(),
        config.conversation.chunk_chars,
    ));

    let state = AppState {
        handler,
        queue,
        datasource,
        refresh_token: config.secrets.refresh_token.as_deref().map(Arc::from),
        notify_after: config.conversation.notify_after(),
        model: config.agent.model.clone(),
    };

    tracing::info!(%display_addr, model = %config.agent.model, "gateway listening");
    tracing::info!("  POST /webhook → inbound messages");
    tracing::info!("  POST /refresh → invalidate source document");
    tracing::info!("  GET  /health  → status probe");

    let app = router(state);
    axum::serve(listener, app).await?;

    // Producers are gone once the router state drops; let the worker drain
    // whatever is still queued before exiting.
    worker.await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/webhook", post(handle_webhook))
        .route("/refresh", post(handle_refresh))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}
