//! Dead-letter queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a failure is worth replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Transient,
    Permanent,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transient => "transient",
            ErrorType::Permanent => "permanent",
        }
    }
}

impl std::str::FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(ErrorType::Transient),
            "permanent" => Ok(ErrorType::Permanent),
            other => Err(format!("unknown error type: {other}")),
        }
    }
}

/// A failed work item with enough context to replay it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Stable id; enqueueing the same id replaces the entry
    pub id: String,

    /// The company/firm the work was for (JSON blob)
    pub company: serde_json::Value,

    /// Last error message
    pub error: String,

    pub error_type: ErrorType,

    /// Pipeline phase that failed, when known
    #[serde(default)]
    pub failed_phase: Option<String>,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Earliest time the entry becomes eligible for dequeue
    pub next_retry_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Create an entry eligible for immediate retry.
    pub fn new(
        id: impl Into<String>,
        company: serde_json::Value,
        error: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            company,
            error: error.into(),
            error_type,
            failed_phase: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: now,
            created_at: now,
            last_failed_at: now,
        }
    }

    /// Set the failed phase.
    pub fn with_failed_phase(mut self, phase: impl Into<String>) -> Self {
        self.failed_phase = Some(phase.into());
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Defer the first retry.
    pub fn with_next_retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_retry_at = at;
        self
    }

    /// Whether the entry is still under its retry ceiling.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Dequeue filter.
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub error_type: Option<ErrorType>,
    pub limit: Option<usize>,
}
