//! Retry with exponential backoff, jitter, and cancel-aware sleeps.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{is_transient, IntelError, Result};

/// Predicate deciding whether an error is worth another attempt.
pub type ShouldRetry = Arc<dyn Fn(&IntelError) -> bool + Send + Sync>;

/// Observer invoked before each backoff sleep.
pub type OnRetry = Arc<dyn Fn(u32, &IntelError) + Send + Sync>;

/// Retry policy.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total calls allowed, including the first
    pub max_attempts: u32,

    /// Backoff before the second attempt
    pub initial_backoff: Duration,

    /// Backoff ceiling
    pub max_backoff: Duration,

    /// Backoff growth factor
    pub multiplier: f64,

    /// Uniform jitter as a fraction of the computed backoff
    pub jitter_fraction: f64,

    /// Retry predicate; defaults to the transient classification
    pub should_retry: Option<ShouldRetry>,

    /// Called with (attempt, error) before each retry sleep
    pub on_retry: Option<OnRetry>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.25,
            should_retry: None,
            on_retry: None,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial backoff.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Disable jitter (deterministic backoff).
    pub fn without_jitter(mut self) -> Self {
        self.jitter_fraction = 0.0;
        self
    }

    /// Set the retry predicate.
    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&IntelError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Set the retry observer.
    pub fn with_on_retry(
        mut self,
        observer: impl Fn(u32, &IntelError) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Backoff for a 0-based attempt index:
    /// `min(initial * multiplier^attempt, max) * (1 + U[-jitter, +jitter])`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let jittered = if self.jitter_fraction > 0.0 {
            let factor = 1.0
                + rand::rng().random_range(-self.jitter_fraction..=self.jitter_fraction);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }

    fn retryable(&self, err: &IntelError) -> bool {
        match &self.should_retry {
            Some(predicate) => predicate(err),
            None => is_transient(err),
        }
    }
}

/// Run `op` under the retry policy.
///
/// The operation receives the 0-based attempt index. Sleeps are preempted by
/// `cancel`; on cancellation the last error is returned immediately.
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    debug_assert!(config.max_attempts >= 1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(IntelError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let last_attempt = attempt + 1 >= config.max_attempts;
                if last_attempt || !config.retryable(&err) {
                    return Err(err);
                }

                if let Some(observer) = &config.on_retry {
                    observer(attempt, &err);
                }

                let delay = config.backoff_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(err),
                }

                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> IntelError {
        IntelError::transient("flaky upstream")
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_makes_exactly_n_calls() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new().with_max_attempts(3).without_jitter();

        let result: Result<()> = retry(&config, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new().without_jitter();

        let result = retry(&config, &CancellationToken::new(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new().with_max_attempts(5);

        let result: Result<()> = retry(&config, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(IntelError::permanent("bad input")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_returns_last_error() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let cancel_in_observer = cancel.clone();
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_on_retry(move |_, _| cancel_in_observer.cancel());

        let result: Result<()> = retry(&config, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        // Cancelled during the first backoff: exactly one call was made and
        // the original error is surfaced.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(IntelError::Transient { .. })));
    }

    #[tokio::test]
    async fn test_pre_cancelled_makes_no_calls() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = retry(&RetryConfig::new(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(matches!(result, Err(IntelError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = RetryConfig::new()
            .with_initial_backoff(Duration::from_millis(500))
            .with_max_backoff(Duration::from_secs(30))
            .without_jitter();

        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(2));
        // Far past the cap
        assert_eq!(config.backoff_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = RetryConfig::new()
            .with_initial_backoff(Duration::from_secs(1))
            .with_max_backoff(Duration::from_secs(60));

        for _ in 0..50 {
            let backoff = config.backoff_for_attempt(0).as_secs_f64();
            assert!(backoff >= 0.75 - 1e-9 && backoff <= 1.25 + 1e-9, "{backoff}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_should_retry() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new()
            .with_max_attempts(4)
            .without_jitter()
            .with_should_retry(|err| matches!(err, IntelError::Parse(_)));

        let result: Result<()> = retry(&config, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(IntelError::Parse("again".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
