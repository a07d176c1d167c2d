//! Metrics collection over stored run state.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::traits::store::{DeadLetterStore, RunStore, Store, SyncLogStore};
use crate::types::run::{RunFilter, RunStatus};

// Collection is a periodic sweep, not a paged API; this bounds one sweep.
const COLLECT_SCAN_LIMIT: usize = 10_000;

/// A snapshot of pipeline health over the lookback window.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub window_start: Option<DateTime<Utc>>,
    pub runs_total: usize,
    pub runs_complete: usize,
    pub runs_failed: usize,
    pub runs_queued: usize,

    /// `failed / (complete + failed)`; 0 when nothing finished
    pub failure_rate: f64,

    /// Summed run cost in USD
    pub total_cost_usd: f64,

    /// Average score over runs with score > 0
    pub avg_score: f64,

    /// Filings-sync outcomes by status
    pub fedsync: HashMap<String, i64>,

    /// Dead-letter queue depth
    pub dlq_depth: u64,
}

impl PipelineMetrics {
    /// Runs that reached complete or failed.
    pub fn finished(&self) -> usize {
        self.runs_complete + self.runs_failed
    }

    /// Failed filings-sync count.
    pub fn fedsync_failed(&self) -> i64 {
        self.fedsync.get("failed").copied().unwrap_or(0)
    }
}

/// Periodically sweeps the store for run outcomes, sync-log failures, and
/// queue depth.
pub struct MetricsCollector<S: Store> {
    store: Arc<S>,
    lookback: Duration,
}

impl<S: Store> MetricsCollector<S> {
    /// Create a collector scanning the given lookback window.
    pub fn new(store: Arc<S>, lookback: Duration) -> Self {
        Self { store, lookback }
    }

    /// Gather a snapshot.
    pub async fn collect(&self) -> Result<PipelineMetrics> {
        let since = Utc::now() - self.lookback;
        let runs = self
            .store
            .list_runs(&RunFilter {
                created_after: Some(since),
                limit: Some(COLLECT_SCAN_LIMIT),
                ..Default::default()
            })
            .await?;

        let mut metrics = PipelineMetrics {
            window_start: Some(since),
            runs_total: runs.len(),
            ..Default::default()
        };

        let mut scored = 0usize;
        let mut score_sum = 0.0;
        for run in &runs {
            match run.status {
                RunStatus::Complete => metrics.runs_complete += 1,
                RunStatus::Failed => metrics.runs_failed += 1,
                RunStatus::Queued => metrics.runs_queued += 1,
                _ => {}
            }
            if let Some(result) = &run.result {
                metrics.total_cost_usd += result.cost_usd;
                if result.score > 0.0 {
                    scored += 1;
                    score_sum += result.score;
                }
            }
        }

        if metrics.finished() > 0 {
            metrics.failure_rate = metrics.runs_failed as f64 / metrics.finished() as f64;
        }
        if scored > 0 {
            metrics.avg_score = score_sum / scored as f64;
        }

        metrics.fedsync = self.store.fedsync_counts(since).await?;
        metrics.dlq_depth = self.store.count_dead_letters().await?;

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::traits::store::{DeadLetterStore, RunStore, SyncLogStore};
    use crate::types::{
        Company, DeadLetterEntry, ErrorType, RunError, RunResult,
    };

    #[tokio::test]
    async fn test_collect_counts_and_rates() {
        let store = Arc::new(MemoryStore::new());

        for i in 0..4 {
            let run = store
                .create_run(&Company::new(format!("Firm {i}")))
                .await
                .unwrap();
            if i < 3 {
                store
                    .update_run_result(
                        run.id,
                        &RunResult {
                            cost_usd: 0.5,
                            score: if i == 0 { 0.0 } else { 0.8 },
                            answers: vec![],
                        },
                    )
                    .await
                    .unwrap();
            } else {
                store
                    .fail_run(
                        run.id,
                        &RunError {
                            message: "boom".into(),
                            category: "transient".into(),
                        },
                    )
                    .await
                    .unwrap();
            }
        }
        store.create_run(&Company::new("Queued")).await.unwrap();
        store.log_fedsync("edgar", "failed", None).await.unwrap();
        store
            .enqueue_dead_letter(&DeadLetterEntry::new(
                "pe-firm-1",
                serde_json::json!({"firm_id": 1}),
                "x",
                ErrorType::Transient,
            ))
            .await
            .unwrap();

        let collector = MetricsCollector::new(store, Duration::hours(24));
        let metrics = collector.collect().await.unwrap();

        assert_eq!(metrics.runs_total, 5);
        assert_eq!(metrics.runs_complete, 3);
        assert_eq!(metrics.runs_failed, 1);
        assert_eq!(metrics.runs_queued, 1);
        assert!((metrics.failure_rate - 0.25).abs() < 1e-9);
        assert!((metrics.total_cost_usd - 1.5).abs() < 1e-9);
        // Zero scores are excluded from the average.
        assert!((metrics.avg_score - 0.8).abs() < 1e-9);
        assert_eq!(metrics.fedsync_failed(), 1);
        assert_eq!(metrics.dlq_depth, 1);
    }

    #[tokio::test]
    async fn test_collect_empty_store() {
        let collector = MetricsCollector::new(Arc::new(MemoryStore::new()), Duration::hours(1));
        let metrics = collector.collect().await.unwrap();
        assert_eq!(metrics.runs_total, 0);
        assert_eq!(metrics.failure_rate, 0.0);
        assert_eq!(metrics.avg_score, 0.0);
    }
}
