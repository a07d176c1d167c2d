//! Resilience primitives: retry with backoff, circuit breaking, and
//! dead-letter replay support.

pub mod breaker;
pub mod retry;

pub use breaker::{
    BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState, OnStateChange, ShouldTrip,
};
pub use retry::{retry, OnRetry, RetryConfig, ShouldRetry};
