//! Fetch module for query jobs.
//!
//! Runs an ADQL query against a TAP service and stores the VOTable result,
//! which is the input of the query job's transform.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sourcecat::fetch::{TableFetcher, TapClient};
//!
//! let client = TapClient::new("https://gea.esac.esa.int/tap-server/tap");
//! client
//!     .fetch("SELECT TOP 10 * FROM gaiadr1.gaia_source", Path::new("output/q.vot"))
//!     .await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::api::logs::{log_info, log_warning};
use crate::error::{FetchError, FetchResult};

/// Default number of attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between attempts in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Produces the VOTable file a query job transforms.
pub trait TableFetcher: Sync {
    /// Run `query` and store the resulting VOTable at `destination`.
    fn fetch(&self, query: &str, destination: &Path) -> impl Future<Output = FetchResult<()>> + Send;
}

/// Synchronous TAP client (`<base>/sync`, `REQUEST=doQuery`).
#[derive(Debug, Clone)]
pub struct TapClient {
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    http: reqwest::Client,
}

impl TapClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(300),
            max_retries: DEFAULT_MAX_RETRIES,
            http: reqwest::Client::new(),
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of attempts (at least one)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn sync_url(&self) -> String {
        format!("{}/sync", self.base_url)
    }

    /// Run the query, retrying transport errors and 5xx answers.
    pub async fn query(&self, query: &str) -> FetchResult<Vec<u8>> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.try_query(query).await {
                Ok(body) => return Ok(body),
                Err(e) if is_retryable(&e) => {
                    log_warning(format!("Attempt {}/{} failed: {}", attempt, self.max_retries, e));
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        log_info(format!("↻ Retrying in {}ms...", RETRY_DELAY_MS));
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Request("no attempt made".to_string())))
    }

    /// Single attempt
    async fn try_query(&self, query: &str) -> FetchResult<Vec<u8>> {
        log_info(format!("POST {}", self.sync_url()));

        let response = self
            .http
            .post(self.sync_url())
            .timeout(self.timeout)
            .form(&query_form(query))
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body[..body.len().min(500)]).into_owned(),
            });
        }

        log_info(format!("Received {} bytes", body.len()));
        Ok(body.to_vec())
    }
}

impl TableFetcher for TapClient {
    async fn fetch(&self, query: &str, destination: &Path) -> FetchResult<()> {
        let body = self.query(query).await?;
        store(destination, &body).await
    }
}

/// Form fields of a synchronous ADQL query.
fn query_form(query: &str) -> [(&'static str, &str); 4] {
    [
        ("REQUEST", "doQuery"),
        ("LANG", "ADQL"),
        ("FORMAT", "votable"),
        ("QUERY", query),
    ]
}

fn is_retryable(err: &FetchError) -> bool {
    match err {
        FetchError::Request(_) => true,
        FetchError::Status { status, .. } => *status >= 500,
        FetchError::Io { .. } => false,
    }
}

/// Write next to the destination, then rename, so a partial download never
/// looks like a finished upstream step.
async fn store(destination: &Path, body: &[u8]) -> FetchResult<()> {
    let io_err = |source| FetchError::Io {
        path: destination.to_path_buf(),
        source,
    };
    let partial = destination.with_extension("part");
    tokio::fs::write(&partial, body).await.map_err(io_err)?;
    tokio::fs::rename(&partial, destination).await.map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sync_url_trims_slash() {
        let client = TapClient::new("https://example.org/tap/");
        assert_eq!(client.sync_url(), "https://example.org/tap/sync");
    }

    #[test]
    fn test_query_form_fields() {
        let form = query_form("SELECT TOP 1 * FROM gaiadr1.gaia_source");
        assert_eq!(form[0], ("REQUEST", "doQuery"));
        assert_eq!(form[2], ("FORMAT", "votable"));
        assert_eq!(form[3].1, "SELECT TOP 1 * FROM gaiadr1.gaia_source");
    }

    #[test]
    fn test_retry_policy() {
        assert!(is_retryable(&FetchError::Request("reset".into())));
        assert!(is_retryable(&FetchError::Status { status: 503, body: String::new() }));
        assert!(!is_retryable(&FetchError::Status { status: 400, body: String::new() }));
    }

    #[test]
    fn test_max_retries_floor() {
        let client = TapClient::new("http://localhost").with_max_retries(0);
        assert_eq!(client.max_retries, 1);
    }

    #[tokio::test]
    async fn test_store_replaces_atomically() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("simulatedData_q.json.vot");

        store(&destination, b"<VOTABLE/>").await.unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"<VOTABLE/>");
        assert!(!destination.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_after_retries() {
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        let client = TapClient::new("http://127.0.0.1:9/tap")
            .with_max_retries(1)
            .with_timeout(Duration::from_secs(2));
        let err = client.query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
    }
}
