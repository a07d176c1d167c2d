//! Per-service circuit breaker with a closed/open/half-open state machine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{IntelError, Result};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Predicate deciding whether a failure counts toward tripping.
pub type ShouldTrip = Arc<dyn Fn(&IntelError) -> bool + Send + Sync>;

/// Observer for state transitions: (service, from, to).
pub type OnStateChange = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Breaker policy.
#[derive(Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting probes
    pub reset_timeout: Duration,

    /// Consecutive half-open successes required to close
    pub half_open_max_probes: u32,

    /// Failure filter; defaults to counting every failure
    pub should_trip: Option<ShouldTrip>,

    /// Transition observer
    pub on_state_change: Option<OnStateChange>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_probes: 1,
            should_trip: None,
            on_state_change: None,
        }
    }
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_should_trip(
        mut self,
        predicate: impl Fn(&IntelError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_trip = Some(Arc::new(predicate));
        self
    }

    pub fn with_on_state_change(
        mut self,
        observer: impl Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Arc::new(observer));
        self
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
}

/// A circuit breaker guarding one named service.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker for a service.
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_successes: 0,
            }),
        }
    }

    /// Service name this breaker guards.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state, applying the implicit open → half-open transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh_locked(&mut inner);
        inner.state
    }

    /// Run `op` through the breaker.
    ///
    /// When the circuit is open and the reset timeout has not elapsed, the
    /// call is rejected with `CircuitOpen` without invoking `op`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            self.refresh_locked(&mut inner);
            if inner.state == CircuitState::Open {
                return Err(IntelError::CircuitOpen {
                    service: self.service.clone(),
                });
            }
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_probes {
                    self.transition_locked(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.last_failure = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, err: &IntelError) {
        let trips = self
            .config
            .should_trip
            .as_ref()
            .map_or(true, |predicate| predicate(err));
        if !trips {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    self.transition_locked(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_locked(&mut inner, CircuitState::Open);
                inner.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn refresh_locked(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true);
            if elapsed {
                info!(service = %self.service, "circuit half-open, admitting probes");
                self.transition_locked(inner, CircuitState::HalfOpen);
                inner.half_open_successes = 0;
            }
        }
    }

    fn transition_locked(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        if let Some(observer) = &self.config.on_state_change {
            observer(&self.service, from, to);
        }
    }
}

/// Lazily-populated registry of breakers by service name.
#[derive(Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry whose breakers share one policy.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get (or lazily create) the breaker for a service.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(service) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().unwrap();
        // Another caller may have won the upgrade race.
        if let Some(breaker) = breakers.get(service) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(CircuitBreaker::new(service, self.config.clone()));
        breakers.insert(service.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Snapshot of all breaker states.
    pub fn states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .read()
            .unwrap()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }
}
