//! Per-endpoint circuit breaker
//!
//! Closed (normal) → Open (fast-fail) after enough consecutive failures;
//! Open → HalfOpen after the cooldown; HalfOpen admits a bounded number of
//! probe calls and closes again after enough consecutive successes, or
//! re-opens on any failure.
//!
//! Only failures the error taxonomy marks as breaker-relevant (timeouts,
//! 429, 5xx, connection errors) should be recorded here; the executor owns
//! that filtering.

use crate::config::BreakerConfig;
use crate::metrics::Metrics;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    halfopen_successes: u32,
    halfopen_probes: u32,
    opened_at: Option<Instant>,
}

/// Failure-aware gate in front of one endpoint.
///
/// State transitions for a single endpoint are linearizable: every
/// transition happens under the one mutex.
pub struct CircuitBreaker {
    endpoint: String,
    failure_threshold: u32,
    open_cooldown: Duration,
    halfopen_required: u32,
    inner: Mutex<Inner>,
    metrics: Option<Arc<Metrics>>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::build(endpoint, config, None)
    }

    /// Like `new`, but every state transition is also counted in the
    /// Prometheus registry.
    pub fn new_with_metrics(
        endpoint: impl Into<String>,
        config: &BreakerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::build(endpoint, config, Some(metrics))
    }

    fn build(
        endpoint: impl Into<String>,
        config: &BreakerConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            failure_threshold: config.failure_threshold,
            open_cooldown: Duration::from_millis(config.open_ms),
            halfopen_required: config.halfopen_successes,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                halfopen_successes: 0,
                halfopen_probes: 0,
                opened_at: None,
            }),
            metrics,
        }
    }

    fn note_transition(&self, to: BreakerState) {
        if let Some(metrics) = &self.metrics {
            metrics.record_breaker_transition(&self.endpoint, to.as_str());
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// An expired cooldown flips Open to HalfOpen as a side effect; in
    /// HalfOpen only a bounded number of probe slots are handed out.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker mutex is never poisoned");

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.open_cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.halfopen_successes = 0;
                    inner.halfopen_probes = 1;
                    tracing::info!(
                        endpoint_name = %self.endpoint,
                        "Circuit breaker cooldown elapsed, moving to half-open"
                    );
                    drop(inner);
                    self.note_transition(BreakerState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.halfopen_probes < self.halfopen_required {
                    inner.halfopen_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex is never poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.halfopen_successes += 1;
                if inner.halfopen_successes >= self.halfopen_required {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.halfopen_probes = 0;
                    inner.opened_at = None;
                    tracing::info!(
                        endpoint_name = %self.endpoint,
                        "Circuit breaker closed after successful half-open probes"
                    );
                    drop(inner);
                    self.note_transition(BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex is never poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        endpoint_name = %self.endpoint,
                        consecutive_failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    drop(inner);
                    self.note_transition(BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.halfopen_successes = 0;
                inner.halfopen_probes = 0;
                tracing::warn!(
                    endpoint_name = %self.endpoint,
                    "Half-open probe failed, circuit breaker re-opened"
                );
                drop(inner);
                self.note_transition(BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner
            .lock()
            .expect("breaker mutex is never poisoned")
            .state
    }

    /// Remaining cooldown when open, `None` otherwise.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let inner = self.inner.lock().expect("breaker mutex is never poisoned");
        match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(at)) => {
                Some(self.open_cooldown.saturating_sub(at.elapsed()))
            }
            _ => None,
        }
    }

    /// Test/setup hook: force the breaker open as if failures accumulated.
    pub fn force_open(&self) {
        {
            let mut inner = self.inner.lock().expect("breaker mutex is never poisoned");
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
        self.note_transition(BreakerState::Open);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, open_ms: u64, halfopen: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            open_ms,
            halfopen_successes: halfopen,
        }
    }

    #[test]
    fn test_starts_closed_and_allows() {
        let breaker = CircuitBreaker::new("e", &config(5, 60_000, 3));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_opens_after_exactly_threshold_failures() {
        let breaker = CircuitBreaker::new("e", &config(5, 60_000, 3));
        for i in 0..4 {
            breaker.record_failure();
            assert_eq!(
                breaker.state(),
                BreakerState::Closed,
                "closed after {} failures",
                i + 1
            );
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let breaker = CircuitBreaker::new("e", &config(3, 60_000, 3));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_cooldown_moves_to_half_open() {
        let breaker = CircuitBreaker::new("e", &config(1, 0, 3));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Zero cooldown: the next acquire flips to half-open.
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_bounded_probes() {
        let breaker = CircuitBreaker::new("e", &config(1, 0, 3));
        breaker.record_failure();

        assert!(breaker.try_acquire()); // open -> half-open, probe 1
        assert!(breaker.try_acquire()); // probe 2
        assert!(breaker.try_acquire()); // probe 3
        assert!(!breaker.try_acquire()); // probe budget exhausted
    }

    #[test]
    fn test_half_open_closes_after_required_successes() {
        let breaker = CircuitBreaker::new("e", &config(1, 0, 3));
        breaker.record_failure();
        assert!(breaker.try_acquire());

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("e", &config(1, 0, 3));
        breaker.record_failure();
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_cooldown_remaining_reported_when_open() {
        let breaker = CircuitBreaker::new("e", &config(1, 60_000, 3));
        assert!(breaker.cooldown_remaining().is_none());
        breaker.record_failure();
        let remaining = breaker.cooldown_remaining().expect("open breaker");
        assert!(remaining <= Duration::from_millis(60_000));
        assert!(remaining > Duration::from_millis(50_000));
    }

    #[test]
    fn test_force_open() {
        let breaker = CircuitBreaker::new("e", &config(5, 60_000, 3));
        breaker.force_open();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_transitions_are_counted_in_metrics() {
        let metrics = Arc::new(crate::metrics::Metrics::new().unwrap());
        let breaker = CircuitBreaker::new_with_metrics("e", &config(1, 0, 1), metrics.clone());

        breaker.record_failure(); // closed -> open
        assert!(breaker.try_acquire()); // open -> half_open
        breaker.record_success(); // half_open -> closed

        let text = metrics.gather().unwrap();
        assert!(text.contains("switchyard_breaker_transitions_total"));
        assert!(text.contains(r#"state="open""#));
        assert!(text.contains(r#"state="half_open""#));
        assert!(text.contains(r#"state="closed""#));
        assert!(text.contains(r#"endpoint="e""#));
    }
}
