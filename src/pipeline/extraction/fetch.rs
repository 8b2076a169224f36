//! Document acquisition from a URL or a local path.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Where the report PDF comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Url(String),
    Path(PathBuf),
}

impl DocumentSource {
    /// `http(s)://` arguments are URLs, anything else a filesystem path.
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(raw.to_string())
        } else {
            Self::Path(PathBuf::from(raw))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Path(path) => path.display().to_string(),
        }
    }
}

/// Fetch policy: a deadline per attempt and a bounded number of retries.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 2,
        }
    }
}

/// Load the document bytes. Any failure here is fatal to the request.
pub fn fetch_document(
    source: &DocumentSource,
    policy: FetchPolicy,
) -> Result<Vec<u8>, ExtractionError> {
    match source {
        DocumentSource::Path(path) => std::fs::read(path).map_err(|e| ExtractionError::Fetch {
            source_ref: path.display().to_string(),
            reason: e.to_string(),
        }),
        DocumentSource::Url(url) => fetch_url(url, policy),
    }
}

fn fetch_url(url: &str, policy: FetchPolicy) -> Result<Vec<u8>, ExtractionError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(policy.timeout)
        .build()
        .map_err(|e| fetch_error(url, e.to_string()))?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_fetch(&client, url, policy) {
            Ok(bytes) => {
                tracing::info!(url, attempt, size = bytes.len(), "Fetched report PDF");
                return Ok(bytes);
            }
            Err(FetchAttempt::Transient(reason)) if attempt <= policy.retries => {
                tracing::warn!(url, attempt, %reason, "Transient fetch failure, retrying");
                std::thread::sleep(Duration::from_millis(250 * attempt as u64));
            }
            Err(FetchAttempt::Transient(reason)) | Err(FetchAttempt::Permanent(reason)) => {
                return Err(fetch_error(url, reason));
            }
        }
    }
}

enum FetchAttempt {
    Transient(String),
    Permanent(String),
}

fn try_fetch(
    client: &reqwest::blocking::Client,
    url: &str,
    policy: FetchPolicy,
) -> Result<Vec<u8>, FetchAttempt> {
    let response = client.get(url).send().map_err(|e| {
        if e.is_timeout() {
            FetchAttempt::Transient(format!(
                "Request timed out after {}s",
                policy.timeout.as_secs()
            ))
        } else if e.is_connect() {
            FetchAttempt::Transient(format!("Connection failed: {e}"))
        } else {
            FetchAttempt::Permanent(e.to_string())
        }
    })?;

    let status = response.status();
    if status.is_server_error() {
        return Err(FetchAttempt::Transient(format!("Status Code: {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(FetchAttempt::Permanent(format!("Status Code: {}", status.as_u16())));
    }

    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| FetchAttempt::Transient(format!("Body read failed: {e}")))
}

fn fetch_error(url: &str, reason: String) -> ExtractionError {
    ExtractionError::Fetch {
        source_ref: url.to_string(),
        reason,
    }
}
