//! Single-endpoint circuit breaker for the remote notebook API.
//!
//! Adapted from the teacher's `crawl_engine::circuit_breaker`, which keys a
//! `DashMap<domain, DomainHealth>` because a crawl talks to many hosts. This
//! client talks to one host, so the per-domain map collapses to a single
//! `Mutex<Health>`; the Closed/HalfOpen/Open state machine and its
//! thresholds are otherwise unchanged.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

#[derive(Debug, Clone)]
struct Health {
    consecutive_failures: u32,
    consecutive_successes_in_halfopen: u32,
    last_opened: Option<Instant>,
    state: CircuitState,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes_in_halfopen: 0,
            last_opened: None,
            state: CircuitState::Closed,
        }
    }
}

pub struct CircuitBreaker {
    health: Mutex<Health>,
    failure_threshold: u32,
    success_threshold: u32,
    half_open_timeout: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, success_threshold: u32, half_open_timeout: Duration) -> Self {
        Self {
            health: Mutex::new(Health::default()),
            failure_threshold,
            success_threshold,
            half_open_timeout,
        }
    }

    #[must_use]
    pub fn should_attempt(&self) -> bool {
        let mut health = self.health.lock();
        match health.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let Some(opened) = health.last_opened else {
                    return false;
                };
                if opened.elapsed() >= self.half_open_timeout {
                    health.state = CircuitState::HalfOpen;
                    health.consecutive_successes_in_halfopen = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut health = self.health.lock();
        health.consecutive_failures = 0;
        if health.state == CircuitState::HalfOpen {
            health.consecutive_successes_in_halfopen += 1;
            if health.consecutive_successes_in_halfopen >= self.success_threshold {
                health.state = CircuitState::Closed;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut health = self.health.lock();
        health.consecutive_failures += 1;
        if health.consecutive_failures >= self.failure_threshold && health.state != CircuitState::Open
        {
            health.state = CircuitState::Open;
            health.last_opened = Some(Instant::now());
            health.consecutive_successes_in_halfopen = 0;
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.health.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failures_then_blocks() {
        let cb = CircuitBreaker::new(3, 2, Duration::from_secs(60));
        assert!(cb.should_attempt());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.should_attempt());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_attempt());
    }

    #[test]
    fn transitions_half_open_after_timeout_and_closes_on_success() {
        let cb = CircuitBreaker::new(1, 1, Duration::from_millis(50));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(80));
        assert!(cb.should_attempt());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
