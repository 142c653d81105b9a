//! Circuit breaker around outbound replay calls.
//!
//! One breaker per backend endpoint, constructed explicitly and passed by
//! reference into the processor — never a global. Closed until consecutive
//! failures hit the threshold; open rejects calls for a cooldown that doubles
//! per consecutive open (capped); half-open admits exactly one probe call at
//! a time, closing again after enough consecutive successes.
//!
//! Time is injected through `Instant` arguments so tests never sleep.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker thresholds and cooldown schedule.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it.
    pub success_threshold: u32,
    /// First cooldown; doubles per consecutive open.
    pub base_cooldown: Duration,
    /// Cooldown cap.
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            base_cooldown: Duration::from_secs(1),
            max_cooldown: Duration::from_secs(30),
        }
    }
}

/// Fail-fast guard for one backend endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    /// Consecutive opens without an intervening close; drives the backoff.
    consecutive_opens: u32,
    /// In half-open, whether the single probe slot is free.
    probe_available: bool,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            consecutive_opens: 0,
            probe_available: false,
        }
    }

    /// Current state, advancing open -> half-open if the cooldown elapsed.
    pub fn state(&mut self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if now.duration_since(opened_at) >= self.cooldown() {
                    debug!("breaker cooldown elapsed, moving to half-open");
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.probe_available = true;
                }
            }
        }
        self.state
    }

    /// Whether a call may be issued now. Open rejects immediately without
    /// touching the network; half-open admits exactly one in-flight probe.
    pub fn call_permitted(&mut self, now: Instant) -> bool {
        match self.state(now) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.probe_available {
                    self.probe_available = false;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&mut self, now: Instant) {
        match self.state(now) {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    info!("breaker closed after successful half-open probes");
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.consecutive_opens = 0;
                    self.opened_at = None;
                } else {
                    // Free the probe slot for the next confirming call.
                    self.probe_available = true;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&mut self, now: Instant) {
        match self.state(now) {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!("half-open probe failed, reopening breaker");
                self.open(now);
            }
            CircuitState::Open => {}
        }
    }

    /// Consecutive failures observed while closed.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// When the breaker last opened.
    #[must_use]
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// The cooldown currently in force: base * 2^(opens-1), capped.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        let exp = self.consecutive_opens.saturating_sub(1).min(16);
        let cooldown = self.config.base_cooldown.saturating_mul(1 << exp);
        cooldown.min(self.config.max_cooldown)
    }

    fn open(&mut self, now: Instant) {
        self.consecutive_opens += 1;
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.failure_count = 0;
        self.success_count = 0;
        self.probe_available = false;
        warn!(cooldown = ?self.cooldown(), "breaker opened");
    }
}
