//! Fetch command: drive the HTTP client over a list of URLs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use slop_scraper::config::Config;
use slop_scraper::http_client::{parse_target, FetchError, HttpClient, HttpResponse};
use slop_scraper::rate_limit::{
    normalize_domain, AdmissionController, AdmissionError, AdmissionStats, Outcome, RequestClass,
};

use crate::cli::icons::{error, success, warning};

const DEFAULT_OUTPUT: &str = "slop_results.json";

/// Results are rewritten to disk after this many fetches.
const FLUSH_EVERY: usize = 10;

/// Hosts served by the first-party catalogue API.
const CATALOGUE_HOSTS: &[&str] = &["api.steampowered.com", "store.steampowered.com"];

pub struct FetchOptions {
    pub urls: Vec<String>,
    pub input: Option<PathBuf>,
    pub class: Option<RequestClass>,
    pub output: Option<PathBuf>,
    pub show_stats: bool,
}

/// One fetched URL.
#[derive(Debug, Serialize)]
struct FetchRecord {
    url: String,
    class: RequestClass,
    fetched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    outcome: Outcome,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FetchRecord {
    fn new(
        url: &str,
        class: RequestClass,
        fetched_at: DateTime<Utc>,
        result: &Result<HttpResponse, FetchError>,
    ) -> Self {
        let mut record = Self {
            url: url.to_string(),
            class,
            fetched_at,
            final_url: None,
            status: None,
            outcome: Outcome::Error,
            bytes: 0,
            content_type: None,
            error: None,
        };
        match result {
            Ok(response) => {
                info!("{} -> {}", url, response.status);
                record.final_url = Some(response.url.clone());
                record.status = Some(response.status.as_u16());
                record.outcome = response.outcome();
                record.bytes = response.body.len();
                record.content_type = response.content_type().map(String::from);
            }
            Err(e) => {
                warn!("{} failed: {}", url, e);
                record.error = Some(e.to_string());
            }
        }
        record
    }
}

#[derive(Debug, Serialize)]
struct FetchReport<'a> {
    started_at: DateTime<Utc>,
    written_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    halted: Option<String>,
    results: &'a [FetchRecord],
    admission: AdmissionStats,
}

/// Pick a request class from the URL host.
fn infer_class(url: &str) -> RequestClass {
    match parse_target(url) {
        Ok((_, host)) => {
            let host = host.to_ascii_lowercase();
            if CATALOGUE_HOSTS.contains(&host.as_str()) {
                RequestClass::CatalogueApi
            } else {
                RequestClass::Scrape
            }
        }
        Err(_) => RequestClass::General,
    }
}

/// Gather targets from arguments and the optional input file, dropping duplicates.
async fn collect_targets(urls: Vec<String>, input: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let mut targets = urls;
    if let Some(path) = input {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read URL list {}: {}", path.display(), e)
        })?;
        targets.extend(parse_url_list(&contents));
    }

    let mut seen = std::collections::HashSet::new();
    targets.retain(|url| seen.insert(url.clone()));
    Ok(targets)
}

fn parse_url_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

async fn write_report(
    path: &Path,
    started_at: DateTime<Utc>,
    halted: Option<&AdmissionError>,
    results: &[FetchRecord],
    admission: &AdmissionController,
) -> anyhow::Result<()> {
    let report = FetchReport {
        started_at,
        written_at: Utc::now(),
        halted: halted.map(|e| e.to_string()),
        results,
        admission: admission.stats().await,
    };
    let json = serde_json::to_string_pretty(&report)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
    Ok(())
}

/// Send `true` on the returned channel when Ctrl-C is pressed.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing up");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Fetch every target once, writing results as they accumulate.
pub async fn cmd_fetch(config: &Config, options: FetchOptions) -> anyhow::Result<()> {
    let targets = collect_targets(options.urls, options.input.as_deref()).await?;
    if targets.is_empty() {
        anyhow::bail!("No URLs given. Pass URLs as arguments or use --input.");
    }

    let output = options
        .output
        .or_else(|| config.output.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let admission = AdmissionController::with_config(config.admission_config())
        .with_shutdown(shutdown_on_ctrl_c());

    let mut builder = HttpClient::builder(admission.clone())
        .timeout(config.http.timeout())
        .max_redirects(config.http.max_redirects())
        .max_response_bytes(config.http.max_response_bytes());
    if let Some(ua) = config.http.user_agent.as_deref() {
        builder = builder.user_agent(ua);
    }
    let client = builder.build()?;

    eprintln!(
        "{} Fetching {} URL(s) into {}",
        style("→").dim(),
        targets.len(),
        output.display()
    );

    let progress = ProgressBar::new(targets.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}",
            )?
            .progress_chars("█▓░"),
    );

    let started_at = Utc::now();
    let mut results: Vec<FetchRecord> = Vec::with_capacity(targets.len());
    let mut halted: Option<AdmissionError> = None;

    admission.start_phase("fetch").await;

    for url in &targets {
        let class = options.class.unwrap_or_else(|| infer_class(url));
        let domain = parse_target(url)
            .map(|(_, host)| normalize_domain(&host))
            .unwrap_or_default();
        progress.set_message(domain);

        let fetched_at = Utc::now();
        match client.send(class, url).await {
            Ok(attempt) => {
                results.push(FetchRecord::new(url, class, fetched_at, &attempt.result));
                if let Some(fatal) = attempt.halted {
                    halted = Some(fatal);
                    progress.inc(1);
                    break;
                }
            }
            Err(FetchError::Admission(e)) => {
                // Session halted or shutdown requested before sending.
                halted = Some(e);
                break;
            }
            Err(e) => results.push(FetchRecord::new(url, class, fetched_at, &Err(e))),
        }
        progress.inc(1);

        if results.len() % FLUSH_EVERY == 0 {
            write_report(&output, started_at, None, &results, &admission).await?;
        }
    }

    progress.finish_and_clear();
    admission.finish_phase("fetch").await;
    write_report(&output, started_at, halted.as_ref(), &results, &admission).await?;

    let succeeded = results
        .iter()
        .filter(|r| r.outcome == Outcome::Success)
        .count();
    let rate_limited = results
        .iter()
        .filter(|r| r.outcome == Outcome::RateLimited)
        .count();
    let failed = results.len() - succeeded - rate_limited;

    eprintln!(
        "{} {} succeeded, {} rate limited, {} failed, {} skipped",
        success(),
        style(succeeded).green(),
        style(rate_limited).yellow(),
        style(failed).red(),
        targets.len() - results.len()
    );

    if options.show_stats {
        println!("{}", serde_json::to_string_pretty(&admission.stats().await)?);
    }

    match halted {
        Some(AdmissionError::Cancelled) => {
            eprintln!("{} Stopped early; partial results saved", warning());
            Ok(())
        }
        Some(fatal) => {
            eprintln!("{} {}", error(), fatal);
            eprintln!("  {} Results so far saved to {}", style("→").dim(), output.display());
            Err(fatal.into())
        }
        None => Ok(()),
    }
}
