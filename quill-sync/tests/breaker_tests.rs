use quill_sync::{BreakerConfig, CircuitBreaker, CircuitState};
use std::time::{Duration, Instant};

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new(BreakerConfig::default())
}

#[test]
fn starts_closed_and_permits_calls() {
    let mut b = breaker();
    let now = Instant::now();
    assert_eq!(b.state(now), CircuitState::Closed);
    assert!(b.call_permitted(now));
}

#[test]
fn opens_after_consecutive_failures() {
    let mut b = breaker();
    let now = Instant::now();

    b.record_failure(now);
    b.record_failure(now);
    assert_eq!(b.state(now), CircuitState::Closed);

    b.record_failure(now);
    assert_eq!(b.state(now), CircuitState::Open);
    assert!(!b.call_permitted(now));
    assert!(b.opened_at().is_some());
}

#[test]
fn a_success_resets_the_failure_streak() {
    let mut b = breaker();
    let now = Instant::now();

    b.record_failure(now);
    b.record_failure(now);
    b.record_success(now);
    assert_eq!(b.failure_count(), 0);

    b.record_failure(now);
    b.record_failure(now);
    assert_eq!(b.state(now), CircuitState::Closed);
}

#[test]
fn open_rejects_until_cooldown_elapses() {
    let mut b = breaker();
    let opened = Instant::now();
    for _ in 0..3 {
        b.record_failure(opened);
    }

    let during = opened + Duration::from_millis(500);
    assert_eq!(b.state(during), CircuitState::Open);
    assert!(!b.call_permitted(during));

    let after = opened + Duration::from_millis(1_001);
    assert_eq!(b.state(after), CircuitState::HalfOpen);
}

#[test]
fn half_open_admits_exactly_one_probe() {
    let mut b = breaker();
    let opened = Instant::now();
    for _ in 0..3 {
        b.record_failure(opened);
    }

    let probing = opened + Duration::from_secs(2);
    assert!(b.call_permitted(probing));
    // Second concurrent call is rejected while the probe is in flight.
    assert!(!b.call_permitted(probing));

    // The probe succeeding frees the slot for the confirming call.
    b.record_success(probing);
    assert!(b.call_permitted(probing));
}

#[test]
fn closes_after_enough_half_open_successes() {
    let mut b = breaker();
    let opened = Instant::now();
    for _ in 0..3 {
        b.record_failure(opened);
    }

    let probing = opened + Duration::from_secs(2);
    assert!(b.call_permitted(probing));
    b.record_success(probing);
    assert!(b.call_permitted(probing));
    b.record_success(probing);

    assert_eq!(b.state(probing), CircuitState::Closed);
    assert!(b.call_permitted(probing));
}

#[test]
fn half_open_failure_reopens_with_doubled_cooldown() {
    let mut b = breaker();
    let t0 = Instant::now();
    for _ in 0..3 {
        b.record_failure(t0);
    }
    assert_eq!(b.cooldown(), Duration::from_secs(1));

    let t1 = t0 + Duration::from_secs(2);
    assert!(b.call_permitted(t1));
    b.record_failure(t1);
    assert_eq!(b.state(t1), CircuitState::Open);
    assert_eq!(b.cooldown(), Duration::from_secs(2));

    // Still open inside the doubled window.
    let t2 = t1 + Duration::from_millis(1_500);
    assert_eq!(b.state(t2), CircuitState::Open);
    let t3 = t1 + Duration::from_secs(2);
    assert_eq!(b.state(t3), CircuitState::HalfOpen);
}

#[test]
fn cooldown_is_capped() {
    let mut b = breaker();
    let mut now = Instant::now();
    // Ten consecutive opens would be 512s uncapped.
    for _ in 0..10 {
        now += Duration::from_secs(60);
        for _ in 0..3 {
            b.record_failure(now);
        }
        now += Duration::from_secs(59);
        let _ = b.call_permitted(now);
    }
    assert!(b.cooldown() <= Duration::from_secs(30));
}

#[test]
fn closing_resets_the_cooldown_schedule() {
    let mut b = breaker();
    let t0 = Instant::now();

    // Open twice to escalate the cooldown.
    for _ in 0..3 {
        b.record_failure(t0);
    }
    let t1 = t0 + Duration::from_secs(2);
    assert!(b.call_permitted(t1));
    b.record_failure(t1);
    assert_eq!(b.cooldown(), Duration::from_secs(2));

    // Recover fully.
    let t2 = t1 + Duration::from_secs(5);
    assert!(b.call_permitted(t2));
    b.record_success(t2);
    assert!(b.call_permitted(t2));
    b.record_success(t2);
    assert_eq!(b.state(t2), CircuitState::Closed);

    // The next open starts back at the base cooldown.
    for _ in 0..3 {
        b.record_failure(t2);
    }
    assert_eq!(b.cooldown(), Duration::from_secs(1));
}
