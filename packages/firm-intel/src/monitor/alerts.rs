//! Threshold evaluation and webhook delivery.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{IntelError, Result};
use crate::monitor::collector::PipelineMetrics;

/// Minimum finished runs before the failure-rate rule can fire.
pub const FAILURE_RATE_MIN_SAMPLE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// An alert as POSTed to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    fn new(
        alert_type: &str,
        severity: AlertSeverity,
        message: String,
        details: serde_json::Value,
    ) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            severity,
            message,
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Alerting thresholds.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    /// Failure-rate trigger in (0, 1]
    pub failure_rate: f64,

    /// Cost trigger in USD; 0 disables
    pub cost_usd: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            cost_usd: 0.0,
        }
    }
}

/// Evaluate a snapshot against the thresholds.
pub fn evaluate(metrics: &PipelineMetrics, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if metrics.finished() >= FAILURE_RATE_MIN_SAMPLE
        && metrics.failure_rate > thresholds.failure_rate
    {
        alerts.push(Alert::new(
            "pipeline_failure_rate",
            AlertSeverity::Critical,
            format!(
                "pipeline failure rate {:.0}% over {} finished runs",
                metrics.failure_rate * 100.0,
                metrics.finished()
            ),
            serde_json::json!({
                "failure_rate": metrics.failure_rate,
                "complete": metrics.runs_complete,
                "failed": metrics.runs_failed,
            }),
        ));
    }

    if metrics.fedsync_failed() > 0 {
        alerts.push(Alert::new(
            "fedsync_failure",
            AlertSeverity::Warning,
            format!("{} filings-sync failures in window", metrics.fedsync_failed()),
            serde_json::json!({ "counts": metrics.fedsync }),
        ));
    }

    if thresholds.cost_usd > 0.0 && metrics.total_cost_usd > thresholds.cost_usd {
        alerts.push(Alert::new(
            "cost_overrun",
            AlertSeverity::Warning,
            format!(
                "pipeline spend ${:.2} exceeds ${:.2} threshold",
                metrics.total_cost_usd, thresholds.cost_usd
            ),
            serde_json::json!({
                "total_cost_usd": metrics.total_cost_usd,
                "threshold_usd": thresholds.cost_usd,
            }),
        ));
    }

    alerts
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookSender {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Deliver one alert. Any non-2xx response is a send failure.
    pub async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| IntelError::transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(IntelError::Transient {
                message: format!("webhook returned {status}"),
                status: Some(status.as_u16()),
            });
        }
        debug!(alert_type = %alert.alert_type, "alert delivered");
        Ok(())
    }
}
