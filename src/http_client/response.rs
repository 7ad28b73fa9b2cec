//! HTTP response wrapper.

use std::collections::HashMap;

use reqwest::StatusCode;

use crate::rate_limit::{parse_retry_after, AdmissionError, Outcome};

use super::FetchError;

/// A fully read response from an admitted request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Final URL after redirects.
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response is an explicit rate limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS
    }

    /// How this response was reported to the admission controller.
    pub fn outcome(&self) -> Outcome {
        Outcome::from_status(self.status.as_u16())
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    /// Parsed Retry-After header, capped.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        parse_retry_after(self.headers.get("retry-after").map(|s| s.as_str()))
    }

    /// Deserialize the response body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// One request that was admitted and sent.
#[derive(Debug)]
pub struct Attempt {
    pub result: Result<HttpResponse, FetchError>,
    /// Fatal session error raised while reporting this attempt.
    pub halted: Option<AdmissionError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            url: "https://example.com/".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_rate_limited_response() {
        let resp = response(429, &[("retry-after", "7")], "");
        assert!(resp.is_rate_limited());
        assert_eq!(resp.outcome(), Outcome::RateLimited);
        assert_eq!(resp.retry_after(), Some(std::time::Duration::from_secs(7)));
    }

    #[test]
    fn test_json_body() {
        let resp = response(200, &[("content-type", "application/json")], r#"{"ok":true}"#);
        assert!(resp.is_success());
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["ok"], serde_json::Value::Bool(true));
    }
}
