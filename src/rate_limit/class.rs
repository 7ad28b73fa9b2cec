//! Request classes, window keys and reported outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Traffic category with its own pacing budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// First-party, versioned catalogue API (trusted, fast recovery).
    CatalogueApi,
    /// Third-party sites and wikis (untrusted, paced per domain).
    Scrape,
    /// Anything that fits neither of the above.
    General,
}

impl RequestClass {
    pub const ALL: [RequestClass; 3] = [
        RequestClass::CatalogueApi,
        RequestClass::Scrape,
        RequestClass::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::CatalogueApi => "catalogue_api",
            RequestClass::Scrape => "scrape",
            RequestClass::General => "general",
        }
    }

    /// Whether admissions for this class are tracked per upstream domain.
    pub fn is_per_domain(&self) -> bool {
        matches!(self, RequestClass::Scrape)
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "catalogue_api" | "catalog_api" | "api" => Ok(RequestClass::CatalogueApi),
            "scrape" | "scraping" => Ok(RequestClass::Scrape),
            "general" => Ok(RequestClass::General),
            other => Err(format!("unknown request class: {}", other)),
        }
    }
}

/// Normalize a host for use as a window key: lowercase, no `www.` prefix.
pub fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Key of one sliding window: the class, plus the domain for per-domain classes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub class: RequestClass,
    pub domain: Option<String>,
}

impl WindowKey {
    pub fn new(class: RequestClass, domain: Option<&str>) -> Self {
        let domain = if class.is_per_domain() {
            domain.map(normalize_domain).filter(|d| !d.is_empty())
        } else {
            None
        };
        Self { class, domain }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}/{}", self.class, domain),
            None => write!(f, "{}", self.class),
        }
    }
}

/// Result of one outbound call, as reported back to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Explicit "too many requests" from upstream.
    RateLimited,
    /// Network failure, timeout or any other status.
    Error,
}

impl Outcome {
    /// Classify an HTTP status: 2xx is success, 429 a rejection, anything else an error.
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            200..=299 => Outcome::Success,
            429 => Outcome::RateLimited,
            _ => Outcome::Error,
        }
    }
}
