//! Circuit breaker lifecycle
//!
//! Exactly `failure_threshold` consecutive failures open the breaker;
//! the cooldown admits bounded half-open probes; enough successes close
//! it again and a single half-open failure re-opens it.

use switchyard::config::BreakerConfig;
use switchyard::endpoints::{BreakerState, CircuitBreaker};

fn breaker(threshold: u32, open_ms: u64, halfopen: u32) -> CircuitBreaker {
    CircuitBreaker::new(
        "endpoint-under-test",
        &BreakerConfig {
            failure_threshold: threshold,
            open_ms,
            halfopen_successes: halfopen,
        },
    )
}

#[test]
fn test_opens_after_exactly_threshold_consecutive_failures() {
    let breaker = breaker(5, 60_000, 3);

    for i in 1..=4 {
        breaker.record_failure();
        assert_eq!(
            breaker.state(),
            BreakerState::Closed,
            "still closed after {} failures",
            i
        );
    }

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[test]
fn test_intervening_success_resets_the_streak() {
    let breaker = breaker(3, 60_000, 3);

    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();

    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Closed);

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[tokio::test]
async fn test_full_lifecycle_open_halfopen_closed() {
    let breaker = breaker(2, 50, 2);

    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.try_acquire(), "open breaker fast-fails");

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    assert!(breaker.try_acquire(), "cooldown elapsed: half-open probe");
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_halfopen_failure_reopens() {
    let breaker = breaker(1, 30, 3);

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert!(breaker.try_acquire());
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.try_acquire());
}

#[tokio::test]
async fn test_halfopen_probe_budget_is_bounded() {
    let breaker = breaker(1, 0, 2);
    breaker.record_failure();

    assert!(breaker.try_acquire()); // flips to half-open, probe 1
    assert!(breaker.try_acquire()); // probe 2
    assert!(!breaker.try_acquire(), "probe budget exhausted");
}
