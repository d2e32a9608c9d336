//! Circuit breaker for the PDP transport.
//!
//! Keeps latency bounded during an outage: after enough consecutive
//! failures, requests short-circuit without touching the network until the
//! cooldown elapses, then a single half-open probe decides whether to close
//! the circuit again.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Circuit breaker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a half-open probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are short-circuited.
    Open,
    /// One probe request is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Three-state circuit breaker over consecutive failures.
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    config: BreakerConfig,

    /// Consecutive failures observed while closed.
    failure_count: AtomicU32,

    /// Milliseconds since epoch when the circuit opened; 0 when not open.
    opened_at_ms: AtomicU64,

    /// Whether the single half-open probe has been handed out.
    probe_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            config,
            failure_count: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    /// Current state, accounting for cooldown expiry.
    pub fn state(&self) -> CircuitState {
        self.check_cooldown();
        *self.state.read().unwrap()
    }

    /// Whether a request may be attempted right now.
    ///
    /// In half-open state only the first caller gets the probe slot.
    pub fn allow_request(&self) -> bool {
        self.check_cooldown();
        let state = self.state.read().unwrap();
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !self.probe_in_flight.swap(true, Ordering::SeqCst),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                info!("circuit breaker closing after successful probe");
                self.transition_to(&mut state, CircuitState::Closed);
            }
            CircuitState::Open => {
                debug!("success recorded while circuit open");
            }
        }
    }

    /// Record a failed call (timeout, 5xx, malformed response).
    pub fn record_failure(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(failures, "circuit breaker opening after consecutive failures");
                    self.transition_to(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker re-opening after failed probe");
                self.transition_to(&mut state, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn check_cooldown(&self) {
        if *self.state.read().unwrap() != CircuitState::Open {
            return;
        }
        let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
        if opened_at == 0 {
            return;
        }
        let elapsed_ms = (chrono::Utc::now().timestamp_millis() as u64).saturating_sub(opened_at);
        if elapsed_ms >= self.config.cooldown.as_millis() as u64 {
            let mut state = self.state.write().unwrap();
            if *state == CircuitState::Open {
                info!("circuit breaker half-open after cooldown");
                self.transition_to(&mut state, CircuitState::HalfOpen);
            }
        }
    }

    fn transition_to(&self, state: &mut CircuitState, new_state: CircuitState) {
        *state = new_state;
        match new_state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.opened_at_ms.store(0, Ordering::SeqCst);
                self.probe_in_flight.store(false, Ordering::SeqCst);
            }
            CircuitState::Open => {
                self.opened_at_ms.store(
                    chrono::Utc::now().timestamp_millis() as u64,
                    Ordering::SeqCst,
                );
                self.probe_in_flight.store(false, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                self.probe_in_flight.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_millis(50),
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn cooldown_allows_single_probe() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        // Probe slot already taken.
        assert!(!breaker.allow_request());
    }

    #[test]
    fn probe_success_closes_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
