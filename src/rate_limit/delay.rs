//! Per-class adaptive spacing state.

use std::time::Duration;

use super::class::Outcome;
use super::clock::Instant;
use super::config::{seconds, ClassConfig, ZERO_FLOOR_REJECTION_SPACING};

/// Minimum spacing between admissions of one request class.
///
/// Backs off multiplicatively on rejection and relaxes on success, always
/// staying within `floor..=ceiling`.
#[derive(Debug, Clone)]
pub struct DelayState {
    /// Current spacing between admissions.
    pub spacing: Duration,
    pub floor: Duration,
    pub ceiling: Duration,
    backoff_factor: f64,
    relax_factor: f64,
    /// When the last admission of this class fired.
    pub last_admitted: Option<Instant>,
    /// Total admissions for this class.
    pub admissions: u64,
    /// Total rejections reported for this class.
    pub rejections: u64,
}

impl DelayState {
    pub fn new(config: &ClassConfig, backoff_factor: f64, relax_factor: f64) -> Self {
        let floor = config.base_spacing();
        Self {
            spacing: floor,
            floor,
            ceiling: config.max_spacing().max(floor),
            backoff_factor,
            relax_factor,
            last_admitted: None,
            admissions: 0,
            rejections: 0,
        }
    }

    /// Time until the spacing since the last admission has elapsed.
    pub fn spacing_wait(&self, now: Instant) -> Duration {
        match self.last_admitted {
            Some(last) => self
                .spacing
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn mark_admitted(&mut self, now: Instant) {
        self.last_admitted = Some(now);
        self.admissions += 1;
    }

    /// Adjust spacing for a reported outcome. Returns true if spacing changed.
    pub fn report_outcome(&mut self, outcome: Outcome) -> bool {
        let before = self.spacing;
        match outcome {
            Outcome::RateLimited => {
                self.rejections += 1;
                self.back_off();
            }
            Outcome::Success => self.relax(),
            Outcome::Error => {}
        }
        self.spacing != before
    }

    fn back_off(&mut self) {
        let current = self.spacing.as_secs_f64();
        let next = if current > 0.0 {
            current * self.backoff_factor
        } else {
            ZERO_FLOOR_REJECTION_SPACING
        };
        self.spacing = seconds(next).min(self.ceiling);
    }

    fn relax(&mut self) {
        let next = self.spacing.as_secs_f64() * self.relax_factor;
        self.spacing = seconds(next).max(self.floor);
    }

    /// Whether spacing is currently above its floor.
    pub fn in_backoff(&self) -> bool {
        self.spacing > self.floor
    }
}
