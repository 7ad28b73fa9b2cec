//! Process-wide cooldown gate driven by consecutive rejections.
//!
//! Rejections from any class or domain count toward the same threshold:
//! repeated "too many requests" anywhere means the whole process is pushing
//! too hard, so once tripped every admission waits out the cooldown.

use std::time::Duration;

use tracing::{info, warn};

use super::clock::Instant;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Nothing is admitted until the cooldown has elapsed.
    Tripped { since: Instant },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_rejections: u32,
    last_rejection: Option<Instant>,
    threshold: u32,
    cooldown: Duration,
    reset_window: Duration,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration, reset_window: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_rejections: 0,
            last_rejection: None,
            threshold: threshold.max(1),
            cooldown,
            reset_window,
            trips: 0,
        }
    }

    /// Apply time-based transitions: close after cooldown, forget stale rejections.
    fn refresh(&mut self, now: Instant) {
        match self.state {
            CircuitState::Tripped { since } => {
                if now.saturating_duration_since(since) >= self.cooldown {
                    info!("Circuit closed after {:?} cooldown", self.cooldown);
                    self.state = CircuitState::Closed;
                    self.consecutive_rejections = 0;
                }
            }
            CircuitState::Closed => {
                if let Some(last) = self.last_rejection {
                    if self.consecutive_rejections > 0
                        && now.saturating_duration_since(last) > self.reset_window
                    {
                        self.consecutive_rejections = 0;
                    }
                }
            }
        }
    }

    /// Remaining cooldown if tripped, otherwise zero.
    pub fn gate_wait(&mut self, now: Instant) -> Duration {
        self.refresh(now);
        self.remaining_cooldown(now)
    }

    /// Remaining cooldown as of `now`, without applying any transition.
    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        match self.state {
            CircuitState::Closed => Duration::ZERO,
            CircuitState::Tripped { since } => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(since)),
        }
    }

    /// Count a rejection. Returns true if this one tripped the circuit.
    pub fn record_rejection(&mut self, now: Instant) -> bool {
        self.refresh(now);
        self.consecutive_rejections = self.consecutive_rejections.saturating_add(1);
        self.last_rejection = Some(now);

        if self.state == CircuitState::Closed && self.consecutive_rejections >= self.threshold {
            self.state = CircuitState::Tripped { since: now };
            self.trips += 1;
            warn!(
                "{} consecutive rejections, pausing all requests for {:?}",
                self.consecutive_rejections, self.cooldown
            );
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_rejections = 0;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_tripped(&self) -> bool {
        matches!(self.state, CircuitState::Tripped { .. })
    }

    pub fn consecutive_rejections(&self) -> u32 {
        self.consecutive_rejections
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Number of times the circuit has tripped.
    pub fn trips(&self) -> u64 {
        self.trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(300), Duration::from_secs(600))
    }

    #[test]
    fn test_starts_closed() {
        let mut cb = breaker();
        assert_eq!(cb.gate_wait(Instant::now()), Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_trips_at_threshold() {
        let mut cb = breaker();
        let t0 = Instant::now();
        assert!(!cb.record_rejection(t0));
        assert!(!cb.record_rejection(t0));
        assert_eq!(cb.gate_wait(t0), Duration::ZERO);
        assert!(cb.record_rejection(t0));
        assert!(cb.is_tripped());
        assert_eq!(cb.trips(), 1);

        let later = t0 + Duration::from_secs(100);
        assert_eq!(cb.gate_wait(later), Duration::from_secs(200));
    }

    #[test]
    fn test_closes_after_cooldown() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.record_rejection(t0);
        }

        let after = t0 + Duration::from_secs(300);
        assert_eq!(cb.gate_wait(after), Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_rejections(), 0);
    }

    #[test]
    fn test_remaining_cooldown_is_read_only() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.record_rejection(t0);
        }

        let after = t0 + Duration::from_secs(400);
        assert_eq!(
            cb.remaining_cooldown(t0 + Duration::from_secs(50)),
            Duration::from_secs(250)
        );
        assert_eq!(cb.remaining_cooldown(after), Duration::ZERO);
        assert!(cb.is_tripped());
        assert_eq!(cb.consecutive_rejections(), 3);
    }

    #[test]
    fn test_rejections_while_tripped_do_not_extend_cooldown() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.record_rejection(t0);
        }
        assert!(!cb.record_rejection(t0 + Duration::from_secs(200)));
        assert_eq!(
            cb.gate_wait(t0 + Duration::from_secs(250)),
            Duration::from_secs(50)
        );
        assert_eq!(cb.trips(), 1);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut cb = breaker();
        let t0 = Instant::now();
        cb.record_rejection(t0);
        cb.record_rejection(t0);
        cb.record_success();
        assert_eq!(cb.consecutive_rejections(), 0);
        assert!(!cb.record_rejection(t0));
        assert!(!cb.is_tripped());
    }

    #[test]
    fn test_idle_counter_resets() {
        let mut cb = breaker();
        let t0 = Instant::now();
        cb.record_rejection(t0);
        cb.record_rejection(t0);

        let idle = t0 + Duration::from_secs(601);
        assert!(!cb.record_rejection(idle));
        assert_eq!(cb.consecutive_rejections(), 1);
    }
}
