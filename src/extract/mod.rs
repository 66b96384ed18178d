//! Extraction layer
//!
//! Every proxy-list provider is wrapped in an [`Extractor`]. Extractors are
//! created by name through the [`ExtractorRegistry`] and driven concurrently
//! by the [`ExtractionCoordinator`], which isolates failures per source and
//! merges the output.

pub mod coordinator;
pub mod dedup;
pub mod registry;
pub mod retry;
pub mod sources;

pub use coordinator::{CoordinatorConfig, ExtractionCoordinator, ExtractionRun, SourceOutcome, SourceStatus};
pub use dedup::{merge_candidates, MergedCandidate};
pub use registry::{ExtractorConstructor, ExtractorRegistry};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use sources::{HtmlTableExtractor, JsonApiExtractor, TextListExtractor};

use crate::error::{ExtractionCause, ExtractionError};
use crate::proxy::ProxyCandidate;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Default timeout for a whole extraction in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Default number of pages a paginated source may fetch
const DEFAULT_MAX_PAGES: usize = 5;

/// How a source publishes its list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Api,
    HtmlScraping,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Api => write!(f, "api"),
            SourceKind::HtmlScraping => write!(f, "html"),
        }
    }
}

/// Output of one extraction.
///
/// `error` is set when the extractor hit a failure after it had already
/// parsed some candidates; the run is then reported as partial.
#[derive(Debug, Clone, Default)]
pub struct ExtractBatch {
    pub candidates: Vec<ProxyCandidate>,
    pub error: Option<ExtractionError>,
    /// Rows or lines that could not be turned into a candidate
    pub parse_failures: usize,
}

impl ExtractBatch {
    pub fn new(candidates: Vec<ProxyCandidate>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }

    pub fn with_parse_failures(mut self, parse_failures: usize) -> Self {
        self.parse_failures = parse_failures;
        self
    }

    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }

    /// Drop everything past `limit` (0 means unlimited)
    pub fn truncate(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.candidates.truncate(limit);
        }
        self
    }

    /// Turn an error into a partial batch when something was already parsed.
    pub fn or_partial(
        candidates: Vec<ProxyCandidate>,
        parse_failures: usize,
        error: ExtractionError,
    ) -> Result<Self, ExtractionError> {
        if candidates.is_empty() {
            return Err(error);
        }
        Ok(Self {
            candidates,
            error: Some(error),
            parse_failures,
        })
    }
}

/// A source of proxy candidates.
///
/// Implementations shape their own requests, bound their own execution time
/// (a timeout becomes a retryable [`ExtractionError`]) and return whatever
/// they parsed before a failure rather than discarding it.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn source_id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Produce at most `limit` candidates (0 means unlimited)
    async fn extract(&self, limit: usize) -> Result<ExtractBatch, ExtractionError>;
}

/// Configuration handed to extractor constructors
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Budget for a whole `extract` call
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Upper bound on pages fetched by paginated sources
    pub max_pages: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl ExtractorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Build the HTTP client shared by all requests of one extractor
    pub fn build_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
    }
}

/// GET `url` and return the body, giving up at `deadline`.
pub(crate) async fn fetch_text(
    client: &Client,
    url: &str,
    source_id: &str,
    deadline: Instant,
) -> Result<String, ExtractionError> {
    let request = async {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok::<_, reqwest::Error>(Err(status.as_u16()));
        }
        response.text().await.map(Ok)
    };

    match tokio::time::timeout_at(deadline, request).await {
        Err(_) => Err(ExtractionError::timeout(source_id)),
        Ok(Ok(Ok(body))) => Ok(body),
        Ok(Ok(Err(status))) => Err(ExtractionError::new(source_id, ExtractionCause::Status(status))),
        Ok(Err(e)) if e.is_timeout() => Err(ExtractionError::timeout(source_id)),
        Ok(Err(e)) => Err(ExtractionError::network(source_id, e.to_string())),
    }
}
