//! Typed errors and transient-error classification.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on failure kinds; the retry and circuit-breaker layers key off
//! [`is_transient`].

use thiserror::Error;

/// Errors surfaced by the extraction engine.
#[derive(Debug, Error)]
pub enum IntelError {
    /// Tagged-at-source transient failure, optionally carrying an HTTP status
    #[error("transient error: {message}")]
    Transient {
        message: String,
        status: Option<u16>,
    },

    /// Failure that will not succeed on retry
    #[error("permanent error: {message}")]
    Permanent {
        message: String,
        status: Option<u16>,
    },

    /// Per-firm LLM spend reached the configured maximum
    #[error("cost budget exhausted for firm {firm_id}")]
    BudgetExhausted { firm_id: i64 },

    /// Circuit breaker rejected the call without invoking it
    #[error("circuit open for service: {service}")]
    CircuitOpen { service: String },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Firm does not exist
    #[error("firm not found: {firm_id}")]
    FirmNotFound { firm_id: i64 },

    /// Entity required by an update is missing
    #[error("not found: {entity}")]
    NotFound { entity: String },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// LLM transport failed
    #[error("LLM client error: {0}")]
    Client(#[from] llm_client::ClientError),

    /// Crawl or scrape failed
    #[error("crawl error: {0}")]
    Crawl(String),

    /// An LLM response could not be parsed
    #[error("response parse error: {0}")]
    Parse(String),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl IntelError {
    /// Wrap a storage backend error.
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        IntelError::Storage(err.into())
    }

    /// Tag a message as transient.
    pub fn transient(message: impl Into<String>) -> Self {
        IntelError::Transient {
            message: message.into(),
            status: None,
        }
    }

    /// Tag a message as permanent.
    pub fn permanent(message: impl Into<String>) -> Self {
        IntelError::Permanent {
            message: message.into(),
            status: None,
        }
    }

    /// Classify an io error by kind.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut => IntelError::Transient {
                message: err.to_string(),
                status: None,
            },
            _ => IntelError::Permanent {
                message: err.to_string(),
                status: None,
            },
        }
    }

    /// Coarse category for persisted error records.
    pub fn category(&self) -> &'static str {
        if matches!(self, IntelError::Cancelled) {
            "cancelled"
        } else if is_transient(self) {
            "transient"
        } else {
            "permanent"
        }
    }
}

/// HTTP statuses worth retrying.
pub fn is_transient_http_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

const TRANSIENT_MESSAGE_MARKERS: [&str; 8] = [
    "connection reset by peer",
    "broken pipe",
    "temporary failure in name resolution",
    "no such host",
    "tls handshake timeout",
    "i/o timeout",
    "server closed idle connection",
    "transport connection broken",
];

/// Whether a lowercased error message names a known transient network failure.
pub fn is_transient_message(message: &str) -> bool {
    TRANSIENT_MESSAGE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Transient-error classification.
///
/// An error is transient iff it is tagged as such at the source (an untagged
/// status defers to the HTTP status table), is a network-level client
/// failure, or its message names a known connection-level fault.
/// Cancellation is never transient.
pub fn is_transient(err: &IntelError) -> bool {
    match err {
        IntelError::Transient { status, .. } => match status {
            Some(status) => is_transient_http_status(*status),
            None => true,
        },
        IntelError::Cancelled => false,
        IntelError::CircuitOpen { .. } => false,
        IntelError::Client(client_err) => client_err.is_transient(),
        other => is_transient_message(&other.to_string().to_lowercase()),
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, IntelError>;
