//! Run records: the generic pipeline surface and the PE extraction runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of any run. `queued → running → {complete | failed | skipped}`;
/// terminal states are permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Complete,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed | RunStatus::Skipped)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "complete" => Ok(RunStatus::Complete),
            "failed" => Ok(RunStatus::Failed),
            "skipped" => Ok(RunStatus::Skipped),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// The company a generic run operates on (stored as a JSON blob).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    /// PE firm id when the run belongs to the PE pipeline
    #[serde(default)]
    pub firm_id: Option<i64>,
}

impl Company {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            firm_id: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_firm_id(mut self, firm_id: i64) -> Self {
        self.firm_id = Some(firm_id);
        self
    }
}

/// Result payload of a complete generic run (stored as a JSON blob).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    /// Total spend attributed to the run, USD
    #[serde(default)]
    pub cost_usd: f64,

    /// Aggregate quality score (0 when not scored)
    #[serde(default)]
    pub score: f64,

    /// Extracted answers, keyed by question
    #[serde(default)]
    pub answers: Vec<ResultAnswer>,
}

/// A compact answer row inside a run result blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultAnswer {
    pub question_key: String,
    pub value: serde_json::Value,
    pub confidence: f64,
}

/// Error payload of a failed generic run (stored as a JSON blob).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    /// Coarse category: "transient", "permanent", "cancelled"
    pub category: String,
}

/// A generic pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub company: Company,
    pub status: RunStatus,
    #[serde(default)]
    pub result: Option<RunResult>,
    #[serde(default)]
    pub error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named phase within a generic run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPhase {
    pub id: Uuid,
    pub run_id: Uuid,
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
}

/// Filter for listing generic runs. Results sort `created_at DESC`.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub company_url: Option<String>,
    pub error_category: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    /// Default 100
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RunFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(100)
    }
}

/// A PE firm extraction run - the identity answers reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmRun {
    pub id: i64,
    pub firm_id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Option<FirmRunStats>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Stats recorded when a firm run closes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmRunStats {
    pub pages_crawled: usize,
    pub pages_from_cache: bool,
    pub questions_asked: usize,
    pub answers_extracted: usize,
    pub tier2_escalations: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Complete.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Complete,
            RunStatus::Failed,
            RunStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_filter_default_limit() {
        assert_eq!(RunFilter::default().effective_limit(), 100);
        let filter = RunFilter {
            limit: Some(5),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), 5);
    }
}
