//! Read-only snapshots of admission state for logging.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::class::RequestClass;

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub classes: Vec<ClassStats>,
    pub windows: Vec<WindowStats>,
    pub circuit: CircuitStats,
    pub session: SessionStats,
}

/// Pacing state of one request class.
#[derive(Debug, Clone, Serialize)]
pub struct ClassStats {
    pub class: RequestClass,
    pub spacing_seconds: f64,
    pub floor_seconds: f64,
    pub ceiling_seconds: f64,
    pub in_backoff: bool,
    pub admissions: u64,
    pub rejections: u64,
}

/// Occupancy of one sliding window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub class: RequestClass,
    pub domain: Option<String>,
    pub recent: usize,
    pub ceiling: usize,
    pub horizon_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub tripped: bool,
    pub consecutive_rejections: u32,
    pub threshold: u32,
    pub trips: u64,
    pub remaining_cooldown_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub admissions: u64,
    pub errors: u64,
    pub max_errors: u64,
    pub max_runtime_hours: f64,
    /// Set once the session has been halted.
    pub halted: Option<String>,
}

impl AdmissionStats {
    pub fn class(&self, class: RequestClass) -> Option<&ClassStats> {
        self.classes.iter().find(|c| c.class == class)
    }

    pub fn window(&self, class: RequestClass, domain: Option<&str>) -> Option<&WindowStats> {
        self.windows
            .iter()
            .find(|w| w.class == class && w.domain.as_deref() == domain)
    }
}
