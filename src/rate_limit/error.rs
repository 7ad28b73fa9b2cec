//! Admission error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why the session safety monitor halted the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripReason {
    /// Too many transient errors were reported.
    ErrorCeiling { errors: u64, limit: u64 },
    /// The session ran longer than allowed.
    RuntimeCeiling { elapsed: Duration, limit: Duration },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::ErrorCeiling { errors, limit } => {
                write!(f, "too many errors ({} of {} allowed)", errors, limit)
            }
            TripReason::RuntimeCeiling { elapsed, limit } => write!(
                f,
                "runtime limit exceeded ({:.2}h elapsed, limit {:.2}h)",
                elapsed.as_secs_f64() / 3600.0,
                limit.as_secs_f64() / 3600.0
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Terminal: the session must flush its work and exit.
    #[error("Session halted: {0}")]
    SessionTripped(TripReason),
    #[error("Admission cancelled by shutdown")]
    Cancelled,
}

impl AdmissionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdmissionError::SessionTripped(_))
    }
}

pub type AdmissionResult<T> = Result<T, AdmissionError>;
