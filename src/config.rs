use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Service configuration.
///
/// Tunables come from an optional `config.toml` (path overridable with
/// `RELAYGATE_CONFIG`) with sensible defaults; a few common knobs can also be
/// overridden from the environment (`RELAYGATE_HOST`, `RELAYGATE_PORT` /
/// `PORT`, `RELAYGATE_MODEL`, `RELAYGATE_SOURCE_URL`). Credentials never live
/// in the file — they are read from the environment only, and the required
/// ones are fatal at startup when missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Tuning for the outbound dispatch queue.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Retry ceiling for rate-limited sends.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base for the exponential retry backoff (`base * 2^attempt`).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Flat minimum spacing between consecutive sends — proactive
    /// steady-state rate limiting, independent of the retry backoff.
    #[serde(default = "default_send_spacing_ms")]
    pub send_spacing_ms: u64,
    /// Hard timeout on each transport call so a hung request cannot stall
    /// the single dispatch worker.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    /// Most recent turns retained per conversation.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Maximum characters per outbound message chunk.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    /// How long the agent may take before the sender gets an interim
    /// "still working" notice.
    #[serde(default = "default_notify_after_secs")]
    pub notify_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Source document the agent answers from; fetched once and memoized
    /// until `/refresh` invalidates it.
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Credentials, environment-only.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    /// Sender identity for outbound messages (e.g. `whatsapp:+14155238886`).
    pub twilio_from: String,
    pub openai_api_key: String,
    /// Bearer credential for `POST /refresh`; refresh is disabled when unset.
    pub refresh_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            send_spacing_ms: default_send_spacing_ms(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            chunk_chars: default_chunk_chars(),
            notify_after_secs: default_notify_after_secs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            source_url: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5000
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_send_spacing_ms() -> u64 {
    1_000
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_history_cap() -> usize {
    20
}

fn default_chunk_chars() -> usize {
    1_500
}

fn default_notify_after_secs() -> u64 {
    5
}

fn default_model() -> String {
    "gpt-4.1".into()
}

fn default_temperature() -> f64 {
    0.7
}

impl DispatchConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn send_spacing(&self) -> Duration {
        Duration::from_millis(self.send_spacing_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl ConversationConfig {
    pub fn notify_after(&self) -> Duration {
        Duration::from_secs(self.notify_after_secs)
    }
}

impl Config {
    /// Load configuration from disk and environment. Missing credentials are
    /// a hard startup failure (spelled out per variable so the fix is
    /// obvious from the log line).
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("RELAYGATE_CONFIG").unwrap_or_else(|_| "config.toml".into());
        let contents = match std::fs::read_to_string(Path::new(&path)) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_sources(contents.as_deref(), |name| std::env::var(name).ok())
    }

    /// Build a config from an optional toml document and an environment
    /// lookup. Split out from `load` so tests stay hermetic.
    pub fn from_sources(
        toml_contents: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: Config = match toml_contents {
            Some(contents) => {
                toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            None => Config::default(),
        };

        if let Some(host) = env("RELAYGATE_HOST").or_else(|| env("HOST")) {
            config.server.host = host;
        }
        if let Some(port) = env("RELAYGATE_PORT").or_else(|| env("PORT")) {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Validation(format!("invalid port: {port}")))?;
        }
        if let Some(model) = env("RELAYGATE_MODEL") {
            config.agent.model = model;
        }
        if let Some(url) = env("RELAYGATE_SOURCE_URL") {
            config.agent.source_url = Some(url);
        }

        config.secrets = Secrets {
            twilio_account_sid: require(&env, "TWILIO_ACCOUNT_SID")?,
            twilio_auth_token: require(&env, "TWILIO_AUTH_TOKEN")?,
            twilio_from: require(&env, "TWILIO_FROM")?,
            openai_api_key: require(&env, "OPENAI_API_KEY")?,
            refresh_token: env("REFRESH_TOKEN").filter(|t| !t.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.conversation.chunk_chars == 0 {
            return Err(ConfigError::Validation(
                "conversation.chunk_chars must be at least 1".into(),
            ));
        }
        if self.conversation.history_cap == 0 {
            return Err(ConfigError::Validation(
                "conversation.history_cap must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn require(
    env: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    env(name)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_env(name: &str) -> Option<String> {
        match name {
            "TWILIO_ACCOUNT_SID" => Some("AC123".into()),
            "TWILIO_AUTH_TOKEN" => Some("token".into()),
            "TWILIO_FROM" => Some("whatsapp:+14155238886".into()),
            "OPENAI_API_KEY" => Some("sk-test".into()),
            _ => None,
        }
    }

    #[test]
    fn defaults_apply_without_config_file() {
        let config = Config::from_sources(None, full_env).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.dispatch.max_retries, 5);
        assert_eq!(config.conversation.chunk_chars, 1_500);
        assert_eq!(config.conversation.notify_after_secs, 5);
        assert_eq!(config.agent.model, "gpt-4.1");
        assert!(config.secrets.refresh_token.is_none());
    }

    #[test]
    fn toml_overrides_defaults() {
        let toml = r#"
            [server]
            port = 8080

            [dispatch]
            max_retries = 3
            send_spacing_ms = 250

            [conversation]
            history_cap = 10
        "#;
        let config = Config::from_sources(Some(toml), full_env).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.dispatch.max_retries, 3);
        assert_eq!(config.dispatch.send_spacing(), Duration::from_millis(250));
        assert_eq!(config.conversation.history_cap, 10);
        // Untouched sections keep their defaults.
        assert_eq!(config.conversation.chunk_chars, 1_500);
    }

    #[test]
    fn env_port_beats_file() {
        let toml = "[server]\nport = 8080";
        let config = Config::from_sources(Some(toml), |name| {
            full_env(name).or_else(|| (name == "PORT").then(|| "9999".into()))
        })
        .unwrap();
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn missing_credential_is_fatal() {
        let err = Config::from_sources(None, |name| match name {
            "TWILIO_AUTH_TOKEN" => None,
            other => full_env(other),
        })
        .unwrap_err();
        assert!(err.to_string().contains("TWILIO_AUTH_TOKEN"));
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let err = Config::from_sources(None, |name| match name {
            "OPENAI_API_KEY" => Some("   ".into()),
            other => full_env(other),
        })
        .unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let toml = "[conversation]\nchunk_chars = 0";
        let err = Config::from_sources(Some(toml), full_env).unwrap_err();
        assert!(err.to_string().contains("chunk_chars"));
    }

    #[test]
    fn refresh_token_picked_up_when_set() {
        let config = Config::from_sources(None, |name| {
            full_env(name).or_else(|| (name == "REFRESH_TOKEN").then(|| "s3cret".into()))
        })
        .unwrap();
        assert_eq!(config.secrets.refresh_token.as_deref(), Some("s3cret"));
    }
}
