//! Session-wide safety ceilings.
//!
//! Counts admissions and errors for the whole process and enforces a maximum
//! error count and wall-clock runtime. Once either ceiling is crossed the
//! monitor stays tripped for the rest of the process.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::clock::Instant;
use super::config::ANOMALY_RATE_WINDOW;
use super::error::{AdmissionError, AdmissionResult, TripReason};

#[derive(Debug)]
pub struct SessionMonitor {
    started: Instant,
    started_at: DateTime<Utc>,
    admissions: u64,
    errors: u64,
    max_errors: u64,
    max_runtime: Duration,
    anomaly_rate_per_second: f64,
    /// Admissions within the trailing anomaly window.
    recent: VecDeque<Instant>,
    last_anomaly_warning: Option<Instant>,
    tripped: Option<TripReason>,
    /// Named phases currently being timed (e.g. one per source).
    phases: HashMap<String, Instant>,
}

impl SessionMonitor {
    pub fn new(max_errors: u64, max_runtime: Duration, anomaly_rate_per_second: f64) -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            admissions: 0,
            errors: 0,
            max_errors: max_errors.max(1),
            max_runtime,
            anomaly_rate_per_second,
            recent: VecDeque::new(),
            last_anomaly_warning: None,
            tripped: None,
            phases: HashMap::new(),
        }
    }

    fn trip(&mut self, reason: TripReason) -> AdmissionError {
        error!("Session safety limit reached: {}", reason);
        self.tripped = Some(reason.clone());
        AdmissionError::SessionTripped(reason)
    }

    /// Fail if the session is tripped or has outlived its runtime budget.
    pub fn assert_runtime_budget(&mut self, now: Instant) -> AdmissionResult<()> {
        if let Some(reason) = &self.tripped {
            return Err(AdmissionError::SessionTripped(reason.clone()));
        }

        let elapsed = now.saturating_duration_since(self.started);
        if elapsed > self.max_runtime {
            return Err(self.trip(TripReason::RuntimeCeiling {
                elapsed,
                limit: self.max_runtime,
            }));
        }
        Ok(())
    }

    pub fn record_admission(&mut self, now: Instant) {
        self.admissions += 1;

        while let Some(oldest) = self.recent.front() {
            if now.saturating_duration_since(*oldest) >= ANOMALY_RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.push_back(now);

        let rate = self.recent.len() as f64 / ANOMALY_RATE_WINDOW.as_secs_f64();
        if rate > self.anomaly_rate_per_second {
            let recently_warned = self
                .last_anomaly_warning
                .is_some_and(|t| now.saturating_duration_since(t) < ANOMALY_RATE_WINDOW);
            if !recently_warned {
                warn!(
                    "High request rate detected ({:.1}/s over the last {:?}); consider increasing spacing",
                    rate, ANOMALY_RATE_WINDOW
                );
                self.last_anomaly_warning = Some(now);
            }
        }
    }

    /// Count an error; trips the session once the error ceiling is reached.
    pub fn record_error(&mut self) -> AdmissionResult<()> {
        self.errors += 1;
        if let Some(reason) = &self.tripped {
            return Err(AdmissionError::SessionTripped(reason.clone()));
        }
        if self.errors >= self.max_errors {
            return Err(self.trip(TripReason::ErrorCeiling {
                errors: self.errors,
                limit: self.max_errors,
            }));
        }
        debug!("Session errors: {}/{}", self.errors, self.max_errors);
        Ok(())
    }

    pub fn start_phase(&mut self, name: &str, now: Instant) {
        self.phases.insert(name.to_string(), now);
    }

    /// Stop timing a phase, returning how long it ran.
    pub fn finish_phase(&mut self, name: &str, now: Instant) -> Option<Duration> {
        self.phases
            .remove(name)
            .map(|started| now.saturating_duration_since(started))
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn admissions(&self) -> u64 {
        self.admissions
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn max_errors(&self) -> u64 {
        self.max_errors
    }

    pub fn max_runtime(&self) -> Duration {
        self.max_runtime
    }

    pub fn tripped(&self) -> Option<&TripReason> {
        self.tripped.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> SessionMonitor {
        SessionMonitor::new(3, Duration::from_secs(3600), 10.0)
    }

    #[test]
    fn test_error_ceiling_is_terminal() {
        let mut session = monitor();
        assert!(session.record_error().is_ok());
        assert!(session.record_error().is_ok());

        let err = session.record_error().unwrap_err();
        assert_eq!(
            err,
            AdmissionError::SessionTripped(TripReason::ErrorCeiling {
                errors: 3,
                limit: 3
            })
        );
        assert!(err.is_fatal());

        // Stays tripped regardless of time passing.
        let now = Instant::now();
        assert!(session.assert_runtime_budget(now).is_err());
        assert!(session.record_error().is_err());
    }

    #[test]
    fn test_runtime_ceiling() {
        let mut session = monitor();
        let start = session.started;

        assert!(session.assert_runtime_budget(start).is_ok());
        assert!(session
            .assert_runtime_budget(start + Duration::from_secs(3600))
            .is_ok());

        let late = start + Duration::from_secs(3601);
        let err = session.assert_runtime_budget(late).unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::SessionTripped(TripReason::RuntimeCeiling { .. })
        ));
        // Terminal even if checked with an earlier instant.
        assert!(session.assert_runtime_budget(start).is_err());
    }

    #[test]
    fn test_admissions_are_counted() {
        let mut session = monitor();
        let t0 = session.started;
        for i in 0..200u64 {
            session.record_admission(t0 + Duration::from_millis(i));
        }
        assert_eq!(session.admissions(), 200);
        assert!(session.last_anomaly_warning.is_some());
        assert!(session.tripped().is_none());
    }

    #[test]
    fn test_phase_timing() {
        let mut session = monitor();
        let t0 = session.started;
        session.start_phase("pcgamingwiki", t0);
        assert_eq!(
            session.finish_phase("pcgamingwiki", t0 + Duration::from_secs(42)),
            Some(Duration::from_secs(42))
        );
        assert_eq!(session.finish_phase("pcgamingwiki", t0), None);
    }
}
