use std::time::Duration;

use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for relaygate.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Outbound transport ──────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

/// Configuration problems are fatal at startup; nothing recovers from them
/// at request time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Transport errors ───────────────────────────────────────────────────────

/// Outcome classification for a single outbound send attempt.
///
/// The dispatch worker retries `RateLimited` with exponential backoff and
/// drops everything else after logging. Network-level failures (DNS, refused
/// connection, request timeout) are treated as permanent: the provider never
/// told us to slow down, so retrying blind would only stall the queue.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited by provider{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("send rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, RelayError>;
