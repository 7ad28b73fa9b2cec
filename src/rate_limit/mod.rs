//! Request admission for outbound scraping and API traffic.
//!
//! One [`AdmissionController`] decides when each outbound request may fire:
//! - Sliding windows cap bursts per (request class, domain)
//! - Adaptive spacing per request class backs off on 429 and relaxes on success
//! - A process-wide circuit breaker pauses everything after repeated rejections
//! - A session monitor halts the run on too many errors or too much runtime
//!
//! All state is in-memory and process-scoped.

mod circuit;
mod class;
pub mod clock;
mod config;
mod delay;
mod error;
mod limiter;
mod session;
mod stats;
mod window;

pub use circuit::{CircuitBreaker, CircuitState};
pub use class::{normalize_domain, Outcome, RequestClass, WindowKey};
pub use config::{AdmissionConfig, ClassConfig};
pub use delay::DelayState;
pub use error::{AdmissionError, AdmissionResult, TripReason};
pub use limiter::{Admission, AdmissionController};
pub use session::SessionMonitor;
pub use stats::{AdmissionStats, CircuitStats, ClassStats, SessionStats, WindowStats};
pub use window::AdmissionWindow;

/// Longest `Retry-After` we will honour or report.
pub const MAX_RETRY_AFTER: std::time::Duration = std::time::Duration::from_secs(60);

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<std::time::Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| std::time::Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}
