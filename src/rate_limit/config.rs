//! Admission controller configuration and validation.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use super::class::{normalize_domain, RequestClass, WindowKey};

/// Delay applied after a rejection when the spacing floor is zero.
pub const ZERO_FLOOR_REJECTION_SPACING: f64 = 1.0;

/// Trailing interval used to measure the session request rate.
pub const ANOMALY_RATE_WINDOW: Duration = Duration::from_secs(10);

/// Convert validated seconds into a duration, saturating on overflow.
pub(crate) fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Pacing profile for one request class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassConfig {
    /// Spacing floor, and the starting spacing.
    pub base_spacing_seconds: f64,
    /// Spacing ceiling for backoff.
    pub max_spacing_seconds: f64,
    /// Admissions allowed per window horizon, per window key.
    pub burst_ceiling: u32,
    pub window_horizon_seconds: f64,
}

impl ClassConfig {
    pub fn catalogue_api() -> Self {
        Self {
            base_spacing_seconds: 0.6,
            max_spacing_seconds: 120.0,
            burst_ceiling: 100,
            window_horizon_seconds: 60.0,
        }
    }

    pub fn scrape() -> Self {
        Self {
            base_spacing_seconds: 2.0,
            max_spacing_seconds: 30.0,
            burst_ceiling: 60,
            window_horizon_seconds: 60.0,
        }
    }

    pub fn general() -> Self {
        Self {
            base_spacing_seconds: 2.0,
            max_spacing_seconds: 60.0,
            burst_ceiling: 50,
            window_horizon_seconds: 60.0,
        }
    }

    pub fn defaults_for(class: RequestClass) -> Self {
        match class {
            RequestClass::CatalogueApi => Self::catalogue_api(),
            RequestClass::Scrape => Self::scrape(),
            RequestClass::General => Self::general(),
        }
    }

    pub fn base_spacing(&self) -> Duration {
        seconds(self.base_spacing_seconds)
    }

    pub fn max_spacing(&self) -> Duration {
        seconds(self.max_spacing_seconds)
    }

    pub fn window_horizon(&self) -> Duration {
        seconds(self.window_horizon_seconds)
    }

    fn validated(mut self, class: RequestClass) -> Self {
        let defaults = Self::defaults_for(class);

        if !self.base_spacing_seconds.is_finite() || self.base_spacing_seconds < 0.0 {
            warn!(
                "{}: invalid base spacing {}, using {}s",
                class, self.base_spacing_seconds, defaults.base_spacing_seconds
            );
            self.base_spacing_seconds = defaults.base_spacing_seconds;
        }
        if !self.max_spacing_seconds.is_finite() || self.max_spacing_seconds <= 0.0 {
            warn!(
                "{}: invalid max spacing {}, using {}s",
                class, self.max_spacing_seconds, defaults.max_spacing_seconds
            );
            self.max_spacing_seconds = defaults.max_spacing_seconds;
        }
        if self.max_spacing_seconds < self.base_spacing_seconds {
            warn!(
                "{}: max spacing {}s below base spacing, raising to {}s",
                class, self.max_spacing_seconds, self.base_spacing_seconds
            );
            self.max_spacing_seconds = self.base_spacing_seconds;
        }
        if self.burst_ceiling == 0 {
            warn!("{}: burst ceiling of zero is invalid, using 1", class);
            self.burst_ceiling = 1;
        }
        if !self.window_horizon_seconds.is_finite() || self.window_horizon_seconds <= 0.0 {
            warn!(
                "{}: invalid window horizon {}, using {}s",
                class, self.window_horizon_seconds, defaults.window_horizon_seconds
            );
            self.window_horizon_seconds = defaults.window_horizon_seconds;
        }
        self
    }
}

/// Configuration for the whole admission controller.
///
/// Every field has a default; [`AdmissionConfig::validated`] clamps out-of-range
/// values deterministically, so any config can be handed to the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionConfig {
    /// Spacing multiplier on rejection (> 1).
    pub backoff_factor: f64,
    /// Spacing multiplier on success (between 0 and 1).
    pub relax_factor: f64,
    /// Longest single sleep inside `admit`; longer waits are re-checked in segments.
    pub max_wait_seconds: f64,
    /// Consecutive rejections (any source) that trip the circuit.
    pub circuit_trip_threshold: u32,
    pub circuit_cooldown_seconds: f64,
    /// Idle time after which the consecutive-rejection counter resets.
    pub circuit_reset_window_seconds: f64,
    /// Error reports that end the session.
    pub session_max_errors: u64,
    pub session_max_runtime_hours: f64,
    /// Trailing request rate that triggers an anomaly warning.
    pub anomaly_rate_per_second: f64,
    pub catalogue_api: ClassConfig,
    pub scrape: ClassConfig,
    pub general: ClassConfig,
    /// Per-domain burst ceilings for the scrape class.
    pub domain_burst_ceilings: BTreeMap<String, u32>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let domain_burst_ceilings = [
            ("pcgamingwiki.com", 15),
            ("steamcommunity.com", 20),
            ("protondb.com", 15),
            ("reddit.com", 10),
        ]
        .into_iter()
        .map(|(domain, ceiling)| (domain.to_string(), ceiling))
        .collect();

        Self {
            backoff_factor: 2.0,
            relax_factor: 0.8,
            max_wait_seconds: 30.0,
            circuit_trip_threshold: 5,
            circuit_cooldown_seconds: 300.0,
            circuit_reset_window_seconds: 600.0,
            session_max_errors: 20,
            session_max_runtime_hours: 6.0,
            anomaly_rate_per_second: 10.0,
            catalogue_api: ClassConfig::catalogue_api(),
            scrape: ClassConfig::scrape(),
            general: ClassConfig::general(),
            domain_burst_ceilings,
        }
    }
}

impl AdmissionConfig {
    /// Clamp every out-of-range value to a usable one, logging each correction.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            warn!(
                "Backoff factor {} must be > 1, using {}",
                self.backoff_factor, defaults.backoff_factor
            );
            self.backoff_factor = defaults.backoff_factor;
        }
        if !self.relax_factor.is_finite() || self.relax_factor <= 0.0 || self.relax_factor >= 1.0
        {
            warn!(
                "Relax factor {} must be between 0 and 1, using {}",
                self.relax_factor, defaults.relax_factor
            );
            self.relax_factor = defaults.relax_factor;
        }
        if !self.max_wait_seconds.is_finite() || self.max_wait_seconds <= 0.0 {
            warn!(
                "Max wait {} must be positive, using {}s",
                self.max_wait_seconds, defaults.max_wait_seconds
            );
            self.max_wait_seconds = defaults.max_wait_seconds;
        }
        if self.circuit_trip_threshold == 0 {
            warn!("Circuit trip threshold of zero is invalid, using 1");
            self.circuit_trip_threshold = 1;
        }
        if !self.circuit_cooldown_seconds.is_finite() || self.circuit_cooldown_seconds < 0.0 {
            warn!(
                "Circuit cooldown {} is invalid, using {}s",
                self.circuit_cooldown_seconds, defaults.circuit_cooldown_seconds
            );
            self.circuit_cooldown_seconds = defaults.circuit_cooldown_seconds;
        }
        if !self.circuit_reset_window_seconds.is_finite()
            || self.circuit_reset_window_seconds <= 0.0
        {
            warn!(
                "Circuit reset window {} is invalid, using {}s",
                self.circuit_reset_window_seconds, defaults.circuit_reset_window_seconds
            );
            self.circuit_reset_window_seconds = defaults.circuit_reset_window_seconds;
        }
        if self.session_max_errors == 0 {
            warn!("Session error ceiling of zero is invalid, using 1");
            self.session_max_errors = 1;
        }
        if !self.session_max_runtime_hours.is_finite() || self.session_max_runtime_hours <= 0.0 {
            warn!(
                "Session runtime ceiling {}h is invalid, using {}h",
                self.session_max_runtime_hours, defaults.session_max_runtime_hours
            );
            self.session_max_runtime_hours = defaults.session_max_runtime_hours;
        }
        if !self.anomaly_rate_per_second.is_finite() || self.anomaly_rate_per_second <= 0.0 {
            warn!(
                "Anomaly rate {} is invalid, using {}/s",
                self.anomaly_rate_per_second, defaults.anomaly_rate_per_second
            );
            self.anomaly_rate_per_second = defaults.anomaly_rate_per_second;
        }

        self.catalogue_api = self.catalogue_api.validated(RequestClass::CatalogueApi);
        self.scrape = self.scrape.validated(RequestClass::Scrape);
        self.general = self.general.validated(RequestClass::General);

        self.domain_burst_ceilings = std::mem::take(&mut self.domain_burst_ceilings)
            .into_iter()
            .filter_map(|(domain, ceiling)| {
                let domain = normalize_domain(&domain);
                if domain.is_empty() {
                    return None;
                }
                if ceiling == 0 {
                    warn!("Burst ceiling of zero for {} is invalid, using 1", domain);
                }
                Some((domain, ceiling.max(1)))
            })
            .collect();

        self
    }

    pub fn class(&self, class: RequestClass) -> &ClassConfig {
        match class {
            RequestClass::CatalogueApi => &self.catalogue_api,
            RequestClass::Scrape => &self.scrape,
            RequestClass::General => &self.general,
        }
    }

    pub fn class_mut(&mut self, class: RequestClass) -> &mut ClassConfig {
        match class {
            RequestClass::CatalogueApi => &mut self.catalogue_api,
            RequestClass::Scrape => &mut self.scrape,
            RequestClass::General => &mut self.general,
        }
    }

    /// Burst ceiling for a window. A domain entry also covers its subdomains.
    pub fn burst_ceiling_for(&self, key: &WindowKey) -> u32 {
        let class_ceiling = self.class(key.class).burst_ceiling;
        let Some(domain) = key.domain.as_deref() else {
            return class_ceiling;
        };

        let mut candidate = domain;
        loop {
            if let Some(ceiling) = self.domain_burst_ceilings.get(candidate) {
                return *ceiling;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return class_ceiling,
            }
        }
    }

    pub fn max_wait(&self) -> Duration {
        seconds(self.max_wait_seconds)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        seconds(self.circuit_cooldown_seconds)
    }

    pub fn circuit_reset_window(&self) -> Duration {
        seconds(self.circuit_reset_window_seconds)
    }

    pub fn session_max_runtime(&self) -> Duration {
        seconds(self.session_max_runtime_hours * 3600.0)
    }
}
