//! Sliding-window burst tracking for one (class, domain) pair.

use std::collections::VecDeque;
use std::time::Duration;

use super::clock::Instant;

/// Admission timestamps within a rolling horizon, bounded by a burst ceiling.
#[derive(Debug, Clone)]
pub struct AdmissionWindow {
    /// Chronological; the front is the oldest retained admission.
    stamps: VecDeque<Instant>,
    ceiling: usize,
    horizon: Duration,
}

impl AdmissionWindow {
    pub fn new(ceiling: u32, horizon: Duration) -> Self {
        let ceiling = ceiling.max(1) as usize;
        Self {
            stamps: VecDeque::with_capacity(ceiling),
            ceiling,
            horizon,
        }
    }

    /// Drop admissions that are at least one horizon old.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) >= self.horizon {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the window has room for another admission, capped at `max_wait`.
    pub fn check(&mut self, now: Instant, max_wait: Duration) -> Duration {
        self.prune(now);
        if self.stamps.len() < self.ceiling {
            return Duration::ZERO;
        }
        match self.stamps.front() {
            Some(oldest) => self
                .horizon
                .saturating_sub(now.saturating_duration_since(*oldest))
                .min(max_wait),
            None => Duration::ZERO,
        }
    }

    /// Record an admission. Only valid right after `check` returned zero.
    pub fn record(&mut self, now: Instant) {
        debug_assert!(self.stamps.len() < self.ceiling);
        self.stamps.push_back(now);
    }

    /// Admissions inside the horizon as of `now`, without mutating the window.
    pub fn occupancy(&self, now: Instant) -> usize {
        self.stamps
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.horizon)
            .count()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_WAIT: Duration = Duration::from_secs(3600);

    #[test]
    fn test_fresh_window_admits_immediately() {
        let mut window = AdmissionWindow::new(3, Duration::from_secs(60));
        assert_eq!(window.check(Instant::now(), MAX_WAIT), Duration::ZERO);
    }

    #[test]
    fn test_zero_ceiling_is_coerced_to_one() {
        let mut window = AdmissionWindow::new(0, Duration::from_secs(60));
        assert_eq!(window.ceiling(), 1);

        let t0 = Instant::now();
        window.record(t0);
        assert_eq!(window.check(t0, MAX_WAIT), Duration::from_secs(60));
    }

    #[test]
    fn test_full_window_waits_for_oldest_to_age_out() {
        let mut window = AdmissionWindow::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        for offset in [0, 5, 10] {
            let now = t0 + Duration::from_secs(offset);
            assert_eq!(window.check(now, MAX_WAIT), Duration::ZERO);
            window.record(now);
        }

        let now = t0 + Duration::from_secs(20);
        assert_eq!(window.check(now, MAX_WAIT), Duration::from_secs(40));

        // Exactly one horizon after the oldest it is pruned.
        let now = t0 + Duration::from_secs(60);
        assert_eq!(window.check(now, MAX_WAIT), Duration::ZERO);
        assert_eq!(window.occupancy(now), 2);
    }

    #[test]
    fn test_wait_is_clamped() {
        let mut window = AdmissionWindow::new(1, Duration::from_secs(600));
        let t0 = Instant::now();
        window.record(t0);
        assert_eq!(
            window.check(t0, Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_occupancy_does_not_prune() {
        let mut window = AdmissionWindow::new(5, Duration::from_secs(10));
        let t0 = Instant::now();
        window.record(t0);
        window.record(t0 + Duration::from_secs(5));

        assert_eq!(window.occupancy(t0 + Duration::from_secs(12)), 1);
        assert_eq!(window.occupancy(t0 + Duration::from_secs(6)), 2);
    }
}
