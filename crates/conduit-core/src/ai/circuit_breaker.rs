//! Per-provider circuit breaker (SPEC_FULL.md §4.5's failure semantics).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks consecutive failures for one provider. Opens after `failure_threshold` consecutive
/// failures; half-opens after `cooldown` elapses, allowing one trial request through.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    started_at: Instant,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at_millis.load(Ordering::SeqCst);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        let elapsed = self.started_at.elapsed().as_millis() as u64;
        if elapsed.saturating_sub(opened_at) >= self.cooldown.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.opened_at_millis.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.opened_at_millis
                .store(self.started_at.elapsed().as_millis() as u64, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_the_counter() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
