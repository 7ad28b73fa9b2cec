//! Configuration loading for slop-scraper.
//!
//! Config files are discovered with the prefer crate and parsed by extension
//! (TOML, YAML or JSON). Every field is optional; anything left out falls back
//! to the admission defaults, and environment variables override the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::http_client::{MAX_REDIRECTS, MAX_RESPONSE_BYTES, REQUEST_TIMEOUT};
use crate::rate_limit::{normalize_domain, AdmissionConfig, ClassConfig, RequestClass};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Overrides for one request class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassSettings {
    pub base_spacing_seconds: Option<f64>,
    pub max_spacing_seconds: Option<f64>,
    pub burst_ceiling: Option<u32>,
    pub window_horizon_seconds: Option<f64>,
}

impl From<&ClassConfig> for ClassSettings {
    fn from(config: &ClassConfig) -> Self {
        Self {
            base_spacing_seconds: Some(config.base_spacing_seconds),
            max_spacing_seconds: Some(config.max_spacing_seconds),
            burst_ceiling: Some(config.burst_ceiling),
            window_horizon_seconds: Some(config.window_horizon_seconds),
        }
    }
}

impl ClassSettings {
    fn apply(&self, config: &mut ClassConfig) {
        if let Some(v) = self.base_spacing_seconds {
            config.base_spacing_seconds = v;
        }
        if let Some(v) = self.max_spacing_seconds {
            config.max_spacing_seconds = v;
        }
        if let Some(v) = self.burst_ceiling {
            config.burst_ceiling = v;
        }
        if let Some(v) = self.window_horizon_seconds {
            config.window_horizon_seconds = v;
        }
    }
}

/// The `[admission]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    pub backoff_factor: Option<f64>,
    pub relax_factor: Option<f64>,
    pub max_wait_seconds: Option<f64>,
    pub circuit_trip_threshold: Option<u32>,
    pub circuit_cooldown_seconds: Option<f64>,
    pub circuit_reset_window_seconds: Option<f64>,
    pub session_max_errors: Option<u64>,
    pub session_max_runtime_hours: Option<f64>,
    pub anomaly_rate_per_second: Option<f64>,
    pub catalogue_api: ClassSettings,
    pub scrape: ClassSettings,
    pub general: ClassSettings,
    /// Extra or replacement per-domain ceilings for the scrape class.
    pub domain_burst_ceilings: BTreeMap<String, u32>,
}

impl From<&AdmissionConfig> for AdmissionSettings {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            backoff_factor: Some(config.backoff_factor),
            relax_factor: Some(config.relax_factor),
            max_wait_seconds: Some(config.max_wait_seconds),
            circuit_trip_threshold: Some(config.circuit_trip_threshold),
            circuit_cooldown_seconds: Some(config.circuit_cooldown_seconds),
            circuit_reset_window_seconds: Some(config.circuit_reset_window_seconds),
            session_max_errors: Some(config.session_max_errors),
            session_max_runtime_hours: Some(config.session_max_runtime_hours),
            anomaly_rate_per_second: Some(config.anomaly_rate_per_second),
            catalogue_api: (&config.catalogue_api).into(),
            scrape: (&config.scrape).into(),
            general: (&config.general).into(),
            domain_burst_ceilings: config.domain_burst_ceilings.clone(),
        }
    }
}

impl AdmissionSettings {
    fn class(&self, class: RequestClass) -> &ClassSettings {
        match class {
            RequestClass::CatalogueApi => &self.catalogue_api,
            RequestClass::Scrape => &self.scrape,
            RequestClass::General => &self.general,
        }
    }

    /// Layer these settings over the defaults. The result is not yet clamped.
    pub fn to_admission_config(&self) -> AdmissionConfig {
        let mut config = AdmissionConfig::default();

        if let Some(v) = self.backoff_factor {
            config.backoff_factor = v;
        }
        if let Some(v) = self.relax_factor {
            config.relax_factor = v;
        }
        if let Some(v) = self.max_wait_seconds {
            config.max_wait_seconds = v;
        }
        if let Some(v) = self.circuit_trip_threshold {
            config.circuit_trip_threshold = v;
        }
        if let Some(v) = self.circuit_cooldown_seconds {
            config.circuit_cooldown_seconds = v;
        }
        if let Some(v) = self.circuit_reset_window_seconds {
            config.circuit_reset_window_seconds = v;
        }
        if let Some(v) = self.session_max_errors {
            config.session_max_errors = v;
        }
        if let Some(v) = self.session_max_runtime_hours {
            config.session_max_runtime_hours = v;
        }
        if let Some(v) = self.anomaly_rate_per_second {
            config.anomaly_rate_per_second = v;
        }
        for class in RequestClass::ALL {
            self.class(class).apply(config.class_mut(class));
        }
        // Keys are normalized first so a user entry replaces the matching default.
        config.domain_burst_ceilings.extend(
            self.domain_burst_ceilings
                .iter()
                .map(|(domain, ceiling)| (normalize_domain(domain), *ceiling)),
        );

        config
    }

    /// Apply `SLOP_*` environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid {}={:?}", key, value);
                    None
                }
            }
        }

        if let Some(v) = parse("SLOP_SESSION_MAX_ERRORS", lookup("SLOP_SESSION_MAX_ERRORS")) {
            self.session_max_errors = Some(v);
        }
        if let Some(v) = parse(
            "SLOP_SESSION_MAX_RUNTIME_HOURS",
            lookup("SLOP_SESSION_MAX_RUNTIME_HOURS"),
        ) {
            self.session_max_runtime_hours = Some(v);
        }
        if let Some(v) = parse("SLOP_MAX_WAIT_SECONDS", lookup("SLOP_MAX_WAIT_SECONDS")) {
            self.max_wait_seconds = Some(v);
        }
        if let Some(v) = parse(
            "SLOP_SCRAPE_SPACING_SECONDS",
            lookup("SLOP_SCRAPE_SPACING_SECONDS"),
        ) {
            self.scrape.base_spacing_seconds = Some(v);
        }
        self
    }
}

/// The `[http]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
    pub max_redirects: Option<usize>,
    pub max_response_mb: Option<u64>,
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        self.timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(REQUEST_TIMEOUT)
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects.unwrap_or(MAX_REDIRECTS)
    }

    pub fn max_response_bytes(&self) -> u64 {
        self.max_response_mb
            .filter(|mb| *mb > 0)
            .map(|mb| mb.saturating_mul(1024 * 1024))
            .unwrap_or(MAX_RESPONSE_BYTES)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output file for fetch results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub admission: AdmissionSettings,
    pub http: HttpSettings,
    /// Path this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults (plus env overrides) when no file is found.
    pub async fn load() -> Self {
        match prefer::load("slop").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            warn!("{}; using defaults", e);
                            Self::default_with_env()
                        }
                    }
                } else {
                    Self::default_with_env()
                }
            }
            Err(_) => Self::default_with_env(),
        }
    }

    /// Create a default config with environment variable overrides applied.
    pub fn default_with_env() -> Self {
        let mut config = Self::default();
        config.admission = config.admission.with_env_overrides();
        config
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        config.admission = config.admission.with_env_overrides();
        Ok(config)
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        let config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(contents)?,
            "json" => serde_json::from_str(contents)?,
            _ => toml::from_str(contents)?,
        };
        Ok(config)
    }

    /// Effective, clamped admission config.
    pub fn admission_config(&self) -> AdmissionConfig {
        self.admission.to_admission_config().validated()
    }

    /// This config with every default and clamp made explicit.
    pub fn effective(&self) -> Self {
        Self {
            admission: (&self.admission_config()).into(),
            http: HttpSettings {
                timeout_seconds: Some(self.http.timeout().as_secs()),
                user_agent: self.http.user_agent.clone(),
                max_redirects: Some(self.http.max_redirects()),
                max_response_mb: Some(self.http.max_response_bytes() / (1024 * 1024)),
            },
            output: self.output.clone(),
            source_path: None,
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
