//! Error types for cpgq.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using cpgq's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for query execution.
///
/// Callers of the engine see exactly one of `Validation`, `Protocol`,
/// `Timeout` or `Execution` for a failed query. `Config` and `Internal` are
/// only produced while constructing components or when an internal invariant
/// is broken.
#[derive(Error, Debug)]
pub enum Error {
    /// Query rejected before any network I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wire-level failure talking to the backend
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Deadline exceeded waiting for the backend
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Backend accepted the query but reported a failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the submit / notify / fetch exchange.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// First message on the notification channel was not the handshake.
    #[error("unexpected first message on notification channel: {received:?}")]
    Handshake { received: String },

    /// Backend rejected the credentials.
    #[error("basic authentication failed")]
    Unauthorized,

    /// Non-success HTTP status on submit or fetch.
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Envelope(String),

    /// Notification channel closed before the completion signal arrived.
    #[error("notification channel closed before completion")]
    ChannelClosed,

    /// Connection-level failure (DNS, refused, reset, TLS).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl Error {
    /// Whether retrying the same query could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Protocol(ProtocolError::Transport(_))
            | Error::Protocol(ProtocolError::ChannelClosed) => true,
            Error::Protocol(ProtocolError::Status { status, .. }) => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(ProtocolError::Envelope(e.to_string()))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not expose the configured duration on the error
            return Error::Timeout(Duration::ZERO);
        }
        Error::Protocol(ProtocolError::Transport(e.to_string()))
    }
}
