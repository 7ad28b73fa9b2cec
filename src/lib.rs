//! slop-scraper: launch-option collection with adaptive request admission.
//!
//! The [`rate_limit`] module decides when each outbound request may fire,
//! [`http_client`] brackets every GET with an admission, and [`config`]
//! loads the settings both are built from.

pub mod config;
pub mod http_client;
pub mod rate_limit;
