//! Client configuration.
//!
//! Settings come from an optional TOML file plus `CARELINK__`-prefixed
//! environment variables, with defaults for everything that is not a
//! credential or a conversation scope.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix, e.g. `CARELINK__API_KEY`.
pub const ENV_PREFIX: &str = "CARELINK";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Connection and session parameters for one signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the remote service, e.g. "https://example.backend.co".
    pub base_url: String,
    /// Project API key sent with every request.
    pub api_key: String,
    /// Bearer credential for the signed-in user.
    pub access_token: String,
    /// Conversation this client is scoped to.
    pub conversation_id: String,
    /// Author name stamped on outgoing messages.
    pub author: String,
    /// Remote table holding the messages.
    pub table: String,
    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Number of messages fetched when a session starts.
    pub history_limit: usize,
    pub realtime: RealtimeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    /// Seconds between heartbeat frames on the feed socket.
    pub heartbeat_secs: u64,
    /// Upper bound for the reconnect backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Settings {
    /// Load settings from defaults, an optional TOML file, and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("table", "messages")?
            .set_default("http_timeout_secs", 30_i64)?
            .set_default("history_limit", 100_i64)?
            .set_default("realtime.heartbeat_secs", 25_i64)?
            .set_default("realtime.max_backoff_ms", 10_000_i64)?;

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let built = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let settings: Settings = built.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("base_url", &self.base_url),
            ("api_key", &self.api_key),
            ("access_token", &self.access_token),
            ("conversation_id", &self.conversation_id),
            ("author", &self.author),
            ("table", &self.table),
        ] {
            if value.trim().is_empty() {
                return Err(SettingsError::Invalid(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    /// REST endpoint for the message table.
    pub fn rest_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.base_url.trim_end_matches('/'),
            self.table
        )
    }

    /// WebSocket endpoint for the realtime feed.
    pub fn realtime_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            urlencoding::encode(&self.api_key)
        )
    }

    /// Feed topic for the message table.
    pub fn topic(&self) -> String {
        format!("realtime:public:{}", self.table)
    }

    /// Row filter scoping the feed to this conversation.
    pub fn change_filter(&self) -> String {
        format!("conversation_id=eq.{}", self.conversation_id)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
