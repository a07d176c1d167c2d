//! Observability loop: metrics collection, threshold alerts, webhook delivery.

pub mod alerts;
pub mod checker;
pub mod collector;

pub use alerts::{
    evaluate, Alert, AlertSeverity, AlertThresholds, WebhookSender, FAILURE_RATE_MIN_SAMPLE,
};
pub use checker::Checker;
pub use collector::{MetricsCollector, PipelineMetrics};
