use axum::{
    Form,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::AppState;
use crate::handler::InboundMessage;
use crate::notifier::{self, CompletionSignal};
use crate::transport::normalize_destination;

/// Inbound webhook envelope, form-encoded in the Twilio style.
#[derive(Debug, Deserialize)]
pub(super) struct WebhookForm {
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "From", default)]
    pub from: String,
}

/// GET /health — always public (no secrets leaked)
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "queue_accepting": state.queue.is_accepting(),
        "source_cached": state.datasource.is_cached(),
        "model": state.model,
    }))
}

/// POST /webhook — fire-and-forget intake.
///
/// Validates the envelope, schedules the delayed notifier and the
/// conversation handler as independent tasks racing on one completion
/// signal, and acknowledges immediately without waiting for either.
pub(super) async fn handle_webhook(
    State(state): State<AppState>,
    Form(form): Form<WebhookForm>,
) -> impl IntoResponse {
    let text = form.body.trim();
    if text.is_empty() || form.from.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    let destination = normalize_destination(&form.from);
    tracing::info!(sender = %destination, "inbound message received");

    let signal = CompletionSignal::new();
    let inbound = InboundMessage::new(destination.clone(), text);

    tokio::spawn(notifier::notify_if_slow(
        state.queue.clone(),
        destination,
        signal.clone(),
        state.notify_after,
    ));
    let handler = state.handler.clone();
    tokio::spawn(async move { handler.handle(inbound, signal).await });

    StatusCode::OK
}

/// POST /refresh — drop the memoized source document.
///
/// Guarded by the configured refresh token when one is set; the comparison
/// is constant-time so the credential cannot be probed byte by byte.
pub(super) async fn handle_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(ref token) = state.refresh_token {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(presented, token) {
            tracing::warn!("refresh rejected: bad or missing authorization");
            return (StatusCode::FORBIDDEN, "Forbidden");
        }
    }

    state.datasource.invalidate();
    (StatusCode::OK, "Refreshed")
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
