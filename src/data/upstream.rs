//! Treasury open-data catalog client
//!
//! Fetches single pages from the CKAN `datastore_search` action that publishes
//! the condominium appraisal dataset, with a per-attempt timeout and retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use super::retry::{retry, RetryPolicy, Transient};
use super::{Record, RecordPage};

/// Default `datastore_search` endpoint of the Treasury catalog
pub const DEFAULT_BASE_URL: &str = "https://catalog.treasury.go.th/tl/api/3/action/datastore_search";

/// Resource id of the condominium appraisal dataset
pub const DEFAULT_RESOURCE_ID: &str = "b115b105-58c6-4c3d-8ca8-687f7501e296";

/// Per-attempt deadline for an outbound request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Largest page the upstream will be asked for in one request
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;

/// Errors that can occur when fetching a page from the catalog
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The request did not complete before its deadline
    #[error("upstream request at offset {offset} timed out after {attempts} attempt(s)")]
    Timeout { offset: u64, attempts: u32 },

    /// The catalog answered with a non-success HTTP status
    #[error("upstream returned HTTP {status} at offset {offset} after {attempts} attempt(s)")]
    Status {
        offset: u64,
        status: u16,
        attempts: u32,
    },

    /// The body was not JSON, or lacked `success: true` and a `result`
    #[error("malformed upstream response at offset {offset}: {detail}")]
    Malformed {
        offset: u64,
        detail: String,
        attempts: u32,
    },

    /// Connection or transport failure
    #[error("upstream request at offset {offset} failed after {attempts} attempt(s): {source}")]
    Request {
        offset: u64,
        attempts: u32,
        #[source]
        source: Arc<reqwest::Error>,
    },
}

impl UpstreamError {
    /// Offset of the page whose fetch failed
    pub fn offset(&self) -> u64 {
        match self {
            UpstreamError::Timeout { offset, .. }
            | UpstreamError::Status { offset, .. }
            | UpstreamError::Malformed { offset, .. }
            | UpstreamError::Request { offset, .. } => *offset,
        }
    }

    /// Number of attempts made before the error surfaced
    pub fn attempts(&self) -> u32 {
        match self {
            UpstreamError::Timeout { attempts, .. }
            | UpstreamError::Status { attempts, .. }
            | UpstreamError::Malformed { attempts, .. }
            | UpstreamError::Request { attempts, .. } => *attempts,
        }
    }

    /// Returns true if the upstream was too slow rather than broken
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout { .. })
    }

    fn from_reqwest(err: reqwest::Error, offset: u64, attempts: u32) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout { offset, attempts }
        } else if err.is_decode() {
            UpstreamError::Malformed {
                offset,
                detail: err.to_string(),
                attempts,
            }
        } else {
            UpstreamError::Request {
                offset,
                attempts,
                source: Arc::new(err),
            }
        }
    }
}

impl Transient for UpstreamError {
    fn is_transient(&self) -> bool {
        !matches!(self, UpstreamError::Malformed { .. })
    }
}

/// Anything that can serve pages of the appraisal dataset
///
/// Implemented by [`UpstreamClient`] for the real catalog; tests plug in
/// in-memory sources.
pub trait PageSource: Send + Sync {
    /// Fetches up to `limit` records starting at `offset`
    ///
    /// A non-empty `search` is forwarded as the upstream free-text `q` filter.
    fn fetch_page(
        &self,
        offset: u64,
        limit: u64,
        search: Option<&str>,
    ) -> impl Future<Output = Result<RecordPage, UpstreamError>> + Send;
}

/// Response envelope of `datastore_search`
#[derive(Debug, Deserialize)]
struct DatastoreResponse {
    #[serde(default)]
    success: bool,
    result: Option<DatastoreResult>,
}

#[derive(Debug, Deserialize)]
struct DatastoreResult {
    records: Vec<Record>,
    #[serde(default)]
    total: Option<u64>,
}

/// Client for the Treasury `datastore_search` endpoint
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Endpoint URL (allows override for testing)
    base_url: String,
    /// Dataset selector sent as `resource_id`
    resource_id: String,
    /// Deadline for each individual attempt
    timeout: Duration,
    /// Ceiling applied to every requested `limit`
    max_page_size: u64,
    /// Retry policy for transient failures
    retry: RetryPolicy,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_RESOURCE_ID)
    }
}

impl UpstreamClient {
    /// Creates a client for the given endpoint and dataset with default limits
    pub fn new(base_url: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into(),
            resource_id: resource_id.into(),
            timeout: DEFAULT_TIMEOUT,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the largest page size ever requested from the catalog
    pub fn with_max_page_size(mut self, max_page_size: u64) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Returns the endpoint this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the query string pairs for one request
    fn query_params(&self, offset: u64, limit: u64, search: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("resource_id", self.resource_id.clone()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(term) = search.filter(|s| !s.is_empty()) {
            params.push(("q", term.to_string()));
        }
        params
    }

    /// Performs a single attempt
    async fn fetch_once(
        &self,
        offset: u64,
        limit: u64,
        search: Option<&str>,
        attempt: u32,
    ) -> Result<RecordPage, UpstreamError> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&self.query_params(offset, limit, search))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, offset, attempt))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                offset,
                status: status.as_u16(),
                attempts: attempt,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, offset, attempt))?;

        parse_page(&body, offset, attempt)
    }
}

impl PageSource for UpstreamClient {
    async fn fetch_page(
        &self,
        offset: u64,
        limit: u64,
        search: Option<&str>,
    ) -> Result<RecordPage, UpstreamError> {
        let limit = limit.clamp(1, self.max_page_size);
        debug!(offset, limit, search = search.unwrap_or(""), "fetching upstream page");

        let result = retry(&self.retry, |attempt| {
            self.fetch_once(offset, limit, search, attempt)
        })
        .await;

        if let Err(ref err) = result {
            error!(
                offset,
                limit,
                search = search.unwrap_or(""),
                attempts = err.attempts(),
                error = %err,
                "upstream page fetch failed"
            );
        }
        result
    }
}

/// Decodes a `datastore_search` body into a page
///
/// # Returns
/// * `Ok(RecordPage)` if the body is JSON with `success: true` and a `result`
/// * `Err(UpstreamError::Malformed)` otherwise
pub fn parse_page(body: &[u8], offset: u64, attempts: u32) -> Result<RecordPage, UpstreamError> {
    let malformed = |detail: String| UpstreamError::Malformed {
        offset,
        detail,
        attempts,
    };

    let response: DatastoreResponse =
        serde_json::from_slice(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    if !response.success {
        return Err(malformed("`success` is not true".to_string()));
    }

    let result = response
        .result
        .ok_or_else(|| malformed("missing `result` object".to_string()))?;

    Ok(RecordPage {
        records: result.records,
        total: result.total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_accepts_successful_response() {
        let body = br#"{
            "success": true,
            "result": {
                "records": [
                    { "CONDO_NAME": "Lumpini Suite", "OFLEVEL": "12" },
                    { "CONDO_NAME": "The Base", "OFLEVEL": "3" }
                ],
                "total": 2
            }
        }"#;

        let page = parse_page(body, 0, 1).expect("Should parse page");

        assert_eq!(page.len(), 2);
        assert_eq!(page.total, Some(2));
        assert_eq!(page.records[1]["CONDO_NAME"], "The Base");
    }

    #[test]
    fn test_parse_page_rejects_success_false() {
        let body = br#"{ "success": false, "error": { "message": "Not found" } }"#;

        let err = parse_page(body, 2000, 1).unwrap_err();

        assert!(matches!(err, UpstreamError::Malformed { offset: 2000, .. }));
        assert!(err.to_string().contains("success"));
    }

    #[test]
    fn test_parse_page_rejects_missing_success_flag() {
        let body = br#"{ "result": { "records": [], "total": 0 } }"#;

        let err = parse_page(body, 0, 1).unwrap_err();

        assert!(matches!(err, UpstreamError::Malformed { .. }));
    }

    #[test]
    fn test_parse_page_rejects_missing_result() {
        let err = parse_page(br#"{ "success": true }"#, 0, 1).unwrap_err();

        assert!(err.to_string().contains("result"));
    }

    #[test]
    fn test_parse_page_rejects_invalid_json() {
        let err = parse_page(b"<html>Bad Gateway</html>", 1000, 2).unwrap_err();

        assert_eq!(err.offset(), 1000);
        assert_eq!(err.attempts(), 2);
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_query_params_include_search_only_when_present() {
        let client = UpstreamClient::default();

        let plain = client.query_params(100, 50, None);
        assert_eq!(
            plain,
            vec![
                ("resource_id", DEFAULT_RESOURCE_ID.to_string()),
                ("limit", "50".to_string()),
                ("offset", "100".to_string()),
            ]
        );

        let empty = client.query_params(0, 50, Some(""));
        assert!(empty.iter().all(|(k, _)| *k != "q"));

        let searched = client.query_params(0, 50, Some("Lumpini"));
        assert_eq!(searched.last(), Some(&("q", "Lumpini".to_string())));
    }

    #[test]
    fn test_error_classification() {
        let timeout = UpstreamError::Timeout {
            offset: 0,
            attempts: 3,
        };
        let status = UpstreamError::Status {
            offset: 5000,
            status: 503,
            attempts: 3,
        };
        let malformed = UpstreamError::Malformed {
            offset: 0,
            detail: "x".to_string(),
            attempts: 1,
        };

        assert!(timeout.is_timeout());
        assert!(!status.is_timeout());
        assert!(timeout.is_transient());
        assert!(status.is_transient());
        assert!(!malformed.is_transient());
        assert_eq!(status.offset(), 5000);
        assert!(status.to_string().contains("503"));
    }

    #[test]
    fn test_with_max_page_size_never_zero() {
        let client = UpstreamClient::default().with_max_page_size(0);
        assert_eq!(client.max_page_size, 1);
    }
}
