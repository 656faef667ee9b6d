//! Connection settings for the analysis backend.

use std::time::Duration;

use cpgq_core::defaults;
use cpgq_core::{Error, Result};

/// Configuration for [`crate::ProtocolClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for the submit and fetch endpoints (`http://host:port`).
    pub base_url: String,
    /// Full URL of the notification WebSocket (`ws://host:port/connect`).
    pub ws_url: String,
    /// Basic-auth username (optional).
    pub username: Option<String>,
    /// Basic-auth password (optional, only sent with a username).
    pub password: Option<String>,
    /// Upper bound on one exchange in seconds.
    pub timeout_seconds: u64,
    /// Maximum exchanges holding an open notification channel at once.
    pub max_exchanges: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_endpoint(defaults::SERVER_HOST, defaults::SERVER_PORT)
    }
}

impl ClientConfig {
    /// Build the HTTP and WebSocket URLs for a backend at `host:port`.
    pub fn for_endpoint(host: &str, port: u16) -> Self {
        let host = host.trim_end_matches('/');
        Self {
            base_url: format!("http://{}:{}", host, port),
            ws_url: format!("ws://{}:{}{}", host, port, defaults::CONNECT_PATH),
            username: None,
            password: None,
            timeout_seconds: defaults::EXCHANGE_TIMEOUT_SECS,
            max_exchanges: defaults::MAX_EXCHANGES,
        }
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CPGQ_SERVER_HOST` | `localhost` | Backend host |
    /// | `CPGQ_SERVER_PORT` | `8080` | Backend port |
    /// | `CPGQ_SERVER_USERNAME` | (none) | Basic-auth username |
    /// | `CPGQ_SERVER_PASSWORD` | (none) | Basic-auth password |
    /// | `CPGQ_EXCHANGE_TIMEOUT_SECS` | `3600` | Upper bound per exchange |
    /// | `CPGQ_MAX_EXCHANGES` | `5` | Simultaneous open channels |
    pub fn from_env() -> Self {
        let host = std::env::var("CPGQ_SERVER_HOST")
            .unwrap_or_else(|_| defaults::SERVER_HOST.to_string());
        let port = std::env::var("CPGQ_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults::SERVER_PORT);

        let mut config = Self::for_endpoint(&host, port);
        config.username = std::env::var("CPGQ_SERVER_USERNAME")
            .ok()
            .filter(|v| !v.is_empty());
        config.password = std::env::var("CPGQ_SERVER_PASSWORD").ok();
        config.timeout_seconds = std::env::var("CPGQ_EXCHANGE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::EXCHANGE_TIMEOUT_SECS);
        config.max_exchanges = std::env::var("CPGQ_MAX_EXCHANGES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::MAX_EXCHANGES)
            .max(1);
        config
    }

    /// Set basic-auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the per-exchange timeout.
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set the number of simultaneous exchanges.
    pub fn with_max_exchanges(mut self, max: usize) -> Self {
        self.max_exchanges = max;
        self
    }

    /// Per-exchange timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }

        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            return Err(Error::Config(format!(
                "ws_url must start with ws:// or wss://, got: {}",
                self.ws_url
            )));
        }

        if self.max_exchanges == 0 {
            return Err(Error::Config(
                "max_exchanges must be at least 1".to_string(),
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(Error::Config(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
