//! HTTP client that paces every request through the admission controller.
//!
//! Each call is bracketed by `admit` (immediately before the request is sent)
//! and `report` (immediately after the result is known). HTTP 429 is reported
//! as a rejection, 2xx as success, and anything else, including network
//! failures and timeouts, as an error.

mod response;
mod user_agent;

pub use response::{Attempt, HttpResponse};
pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{redirect, Client, Response};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::rate_limit::{AdmissionController, AdmissionError, Outcome, RequestClass};

/// Default request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of redirects to follow.
pub const MAX_REDIRECTS: usize = 3;

/// Default maximum response body size.
pub const MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Response too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl FetchError {
    /// Whether the session must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Admission(e) if e.is_fatal())
    }
}

fn extract_response_headers(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

/// Validate a URL for fetching and extract its host.
pub fn parse_target(url: &str) -> Result<(Url, String), FetchError> {
    let invalid = |reason: &str| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host"))?
        .to_string();
    Ok((parsed, host))
}

/// Builder for constructing `HttpClient` with optional configuration.
pub struct HttpClientBuilder {
    admission: AdmissionController,
    timeout: Duration,
    user_agent: Option<String>,
    max_redirects: usize,
    max_response_bytes: u64,
}

impl HttpClientBuilder {
    /// Set the user agent string. Without this, uses the default project agent.
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn max_response_bytes(mut self, max: u64) -> Self {
        self.max_response_bytes = max;
        self
    }

    pub fn build(self) -> Result<HttpClient, FetchError> {
        let user_agent = resolve_user_agent(self.user_agent.as_deref());
        let client = Client::builder()
            .user_agent(user_agent.as_str())
            .timeout(self.timeout)
            .redirect(redirect::Policy::limited(self.max_redirects))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(FetchError::Build)?;

        debug!(
            "HTTP client ready (timeout {:?}, user agent {:?})",
            self.timeout, user_agent
        );

        Ok(HttpClient {
            client,
            admission: self.admission,
            max_response_bytes: self.max_response_bytes,
        })
    }
}

/// HTTP client with admission control on every request.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    admission: AdmissionController,
    max_response_bytes: u64,
}

impl HttpClient {
    /// Create a builder around a shared admission controller.
    pub fn builder(admission: AdmissionController) -> HttpClientBuilder {
        HttpClientBuilder {
            admission,
            timeout: REQUEST_TIMEOUT,
            user_agent: None,
            max_redirects: MAX_REDIRECTS,
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// GET a URL as one admitted attempt.
    ///
    /// Non-2xx statuses are returned as responses; only transport failures,
    /// oversized bodies and admission failures are errors. If reporting the
    /// outcome halts the session, the halt is returned instead of the response;
    /// use [`HttpClient::send`] to keep both.
    pub async fn get(&self, class: RequestClass, url: &str) -> Result<HttpResponse, FetchError> {
        let attempt = self.send(class, url).await?;
        if let Some(halt) = attempt.halted {
            return Err(halt.into());
        }
        attempt.result
    }

    /// Admit, send once and report the outcome.
    ///
    /// The outer error means nothing was sent: the URL was invalid or
    /// admission failed. Otherwise the attempt carries the request result and
    /// any fatal session error raised while reporting it.
    pub async fn send(&self, class: RequestClass, url: &str) -> Result<Attempt, FetchError> {
        let (target, host) = parse_target(url)?;

        self.admission.admit(class, Some(&host)).await?;

        let result = self.fetch(target).await;
        let outcome = match &result {
            Ok(response) => response.outcome(),
            Err(_) => Outcome::Error,
        };

        if let Ok(response) = &result {
            if response.is_rate_limited() {
                match response.retry_after() {
                    Some(retry) => warn!("{} returned 429 (Retry-After {:?})", host, retry),
                    None => warn!("{} returned 429", host),
                }
            }
        }

        let halted = self
            .admission
            .report(class, Some(&host), outcome)
            .await
            .err();
        Ok(Attempt { result, halted })
    }

    async fn fetch(&self, target: Url) -> Result<HttpResponse, FetchError> {
        let mut response = self.client.get(target).send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = extract_response_headers(&response);
        let limit = self.max_response_bytes;

        if let Some(size) = response.content_length() {
            if size > limit {
                return Err(FetchError::TooLarge { size, limit });
            }
        }

        // Chunked bodies have no length up front; stop reading once over the cap.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let size = (body.len() + chunk.len()) as u64;
            if size > limit {
                return Err(FetchError::TooLarge { size, limit });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::rate_limit::AdmissionConfig;

    /// Bytes written by the `/huge` route, and whether it has stopped writing.
    #[derive(Default)]
    struct Sent {
        bytes: AtomicU64,
        done: AtomicBool,
    }

    async fn read_path(socket: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let head = String::from_utf8_lossy(&buf).into_owned();
        head.split_whitespace().nth(1).map(String::from)
    }

    async fn respond(socket: &mut TcpStream, status: &str, extra: &str, body: &str) {
        let reply = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
            status,
            body.len(),
            extra,
            body
        );
        let _ = socket.write_all(reply.as_bytes()).await;
        let _ = socket.shutdown().await;
    }

    async fn stream_chunks(socket: &mut TcpStream, sent: &Sent) {
        let head =
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_ok() {
            let data = vec![b'x'; 64 * 1024];
            let frame = [
                format!("{:x}\r\n", data.len()).into_bytes(),
                data,
                b"\r\n".to_vec(),
            ]
            .concat();
            for _ in 0..1024 {
                if socket.write_all(&frame).await.is_err() {
                    break;
                }
                sent.bytes.fetch_add(frame.len() as u64, Ordering::SeqCst);
            }
        }
        sent.done.store(true, Ordering::SeqCst);
    }

    /// Local HTTP/1.1 server: `/ok` 200, `/limited` 429, `/drop` closes
    /// without answering, `/huge` streams 64 MiB chunked.
    async fn spawn_server() -> (String, Arc<Sent>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let sent = Arc::new(Sent::default());

        let state = sent.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    match read_path(&mut socket).await.as_deref() {
                        Some("/ok") => respond(&mut socket, "200 OK", "", "ok").await,
                        Some("/limited") => {
                            let extra = "Retry-After: 5\r\n";
                            respond(&mut socket, "429 Too Many Requests", extra, "").await
                        }
                        Some("/huge") => stream_chunks(&mut socket, &state).await,
                        _ => drop(socket),
                    }
                });
            }
        });

        (base, sent)
    }

    fn unpaced() -> AdmissionConfig {
        let mut config = AdmissionConfig::default();
        for class in RequestClass::ALL {
            config.class_mut(class).base_spacing_seconds = 0.0;
        }
        config
    }

    #[test]
    fn test_parse_target() {
        let (_, host) = parse_target("https://www.pcgamingwiki.com/wiki/Portal").unwrap();
        assert_eq!(host, "www.pcgamingwiki.com");

        assert!(matches!(
            parse_target("ftp://example.com/file"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_target("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_admitted() {
        let admission = AdmissionController::new();
        let client = HttpClient::builder(admission.clone()).build().unwrap();

        let result = client.get(RequestClass::Scrape, "file:///etc/passwd").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
        assert!(!result.unwrap_err().is_fatal());

        let stats = admission.stats().await;
        assert_eq!(stats.session.admissions, 0);
        assert!(stats.windows.is_empty());
    }

    #[tokio::test]
    async fn test_outcomes_are_reported() {
        let (base, _) = spawn_server().await;
        let admission = AdmissionController::with_config(unpaced());
        let client = HttpClient::builder(admission.clone()).build().unwrap();

        let ok = client
            .get(RequestClass::Scrape, &format!("{}/ok", base))
            .await
            .unwrap();
        assert_eq!(ok.outcome(), Outcome::Success);
        assert_eq!(ok.body, b"ok");

        let limited = client
            .get(RequestClass::Scrape, &format!("{}/limited", base))
            .await
            .unwrap();
        assert_eq!(limited.outcome(), Outcome::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(5)));

        let dropped = client
            .get(RequestClass::Scrape, &format!("{}/drop", base))
            .await;
        assert!(matches!(dropped, Err(FetchError::Request(_))));

        let stats = admission.stats().await;
        let scrape = stats.class(RequestClass::Scrape).unwrap();
        assert_eq!(scrape.admissions, 3);
        assert_eq!(scrape.rejections, 1);
        assert!(scrape.in_backoff);
        assert_eq!(stats.session.errors, 1);
        // The error does not reset the rejection streak.
        assert_eq!(stats.circuit.consecutive_rejections, 1);

        client
            .get(RequestClass::Scrape, &format!("{}/ok", base))
            .await
            .unwrap();
        assert_eq!(admission.stats().await.circuit.consecutive_rejections, 0);
    }

    #[tokio::test]
    async fn test_chunked_body_stops_at_limit() {
        let (base, sent) = spawn_server().await;
        let admission = AdmissionController::with_config(unpaced());
        let client = HttpClient::builder(admission.clone())
            .max_response_bytes(1024)
            .build()
            .unwrap();

        let result = client
            .get(RequestClass::General, &format!("{}/huge", base))
            .await;
        match result {
            Err(FetchError::TooLarge { size, limit }) => {
                assert_eq!(limit, 1024);
                assert!(size < 1024 * 1024);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
        drop(client);

        tokio::time::timeout(Duration::from_secs(10), async {
            while !sent.done.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(sent.bytes.load(Ordering::SeqCst) < 16 * 1024 * 1024);

        assert_eq!(admission.stats().await.session.errors, 1);
    }

    #[tokio::test]
    async fn test_send_keeps_response_when_session_halts() {
        let (base, _) = spawn_server().await;
        let mut config = unpaced();
        config.session_max_errors = 1;
        let admission = AdmissionController::with_config(config);
        let client = HttpClient::builder(admission).build().unwrap();

        let attempt = client
            .send(RequestClass::Scrape, &format!("{}/drop", base))
            .await
            .unwrap();
        assert!(matches!(attempt.result, Err(FetchError::Request(_))));
        assert!(attempt.halted.as_ref().is_some_and(|e| e.is_fatal()));

        let next = client.get(RequestClass::Scrape, &format!("{}/ok", base)).await;
        assert!(next.unwrap_err().is_fatal());
    }
}
