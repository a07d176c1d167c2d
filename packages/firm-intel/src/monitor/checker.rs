//! The Collect → Evaluate → Send loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::monitor::alerts::{evaluate, Alert, AlertThresholds, WebhookSender};
use crate::monitor::collector::MetricsCollector;
use crate::traits::store::Store;
use crate::types::config::MonitorConfig;

/// Periodic health checker. Alerts are best-effort, at-most-once.
pub struct Checker<S: Store> {
    collector: MetricsCollector<S>,
    thresholds: AlertThresholds,
    sender: Option<WebhookSender>,
    interval: std::time::Duration,
}

impl<S: Store> Checker<S> {
    /// Build a checker from monitor configuration.
    pub fn new(store: Arc<S>, config: &MonitorConfig) -> Self {
        let sender = if config.webhook_url.is_empty() {
            None
        } else {
            Some(WebhookSender::new(&config.webhook_url))
        };
        Self {
            collector: MetricsCollector::new(store, config.lookback_window()),
            thresholds: AlertThresholds {
                failure_rate: config.failure_rate_threshold,
                cost_usd: config.cost_threshold_usd,
            },
            sender,
            interval: config.check_interval(),
        }
    }

    /// One collect → evaluate → send cycle. Send failures are logged.
    pub async fn check_once(&self) -> Result<Vec<Alert>> {
        let metrics = self.collector.collect().await?;
        let alerts = evaluate(&metrics, &self.thresholds);

        if let Some(sender) = &self.sender {
            for alert in &alerts {
                if let Err(err) = sender.send(alert).await {
                    warn!(alert_type = %alert.alert_type, error = %err, "alert delivery failed");
                }
            }
        }

        Ok(alerts)
    }

    /// Run the ticker loop until cancelled.
    pub async fn run(&self, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(alerts) if !alerts.is_empty() => {
                            info!(count = alerts.len(), "health check raised alerts");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "health check failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("monitor stopped");
                    return;
                }
            }
        }
    }
}
