//! Twilio messaging transport.
//!
//! One HTTP POST per outbound message, basic auth on the account, form-encoded
//! body. HTTP 429 classifies as rate-limited (with the provider's Retry-After
//! hint when present); every other non-2xx status is permanent. The request
//! carries a hard timeout so a hung call cannot stall the dispatch worker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::dispatch::Transport;
use crate::error::TransportError;

/// Protocol prefix Twilio expects on WhatsApp addresses.
const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Canonicalize a sender/recipient identifier: trimmed, `whatsapp:`-prefixed.
/// Applied before both history keying and transport addressing so the same
/// user is recognized consistently.
#[must_use]
pub fn normalize_destination(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with(WHATSAPP_PREFIX) {
        trimmed.to_owned()
    } else {
        format!("{WHATSAPP_PREFIX}{trimmed}")
    }
}

pub struct TwilioTransport {
    account_sid: String,
    auth_token: String,
    from: String,
    client: Client,
}

impl TwilioTransport {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from: normalize_destination(from),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        )
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        let seconds = headers
            .get("Retry-After")?
            .to_str()
            .ok()?
            .parse::<f64>()
            .ok()?;
        if seconds <= 0.0 {
            return Some(Duration::from_secs(0));
        }
        Some(Duration::from_secs_f64(seconds))
    }
}

#[async_trait]
impl Transport for TwilioTransport {
    async fn deliver(&self, destination: &str, body: &str) -> Result<(), TransportError> {
        let to = normalize_destination(destination);
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", self.from.as_str()), ("To", to.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited {
                retry_after: Self::parse_retry_after(response.headers()),
            });
        }

        let message = response.text().await.unwrap_or_default();
        tracing::error!("Twilio send failed ({status}): {message}");
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
