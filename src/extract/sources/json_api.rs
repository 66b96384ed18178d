use crate::error::ExtractionError;
use crate::extract::{fetch_text, ExtractBatch, Extractor, ExtractorConfig, SourceKind};
use crate::proxy::{AnonymityLevel, ProxyCandidate, ProxyType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Largest page the API serves
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
struct Page {
    data: Vec<serde_json::Value>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u16),
    Text(String),
}

impl PortField {
    fn value(&self) -> Option<u16> {
        match self {
            PortField::Number(port) => Some(*port),
            PortField::Text(port) => port.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    ip: String,
    port: PortField,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    anonymity_level: Option<String>,
    #[serde(default)]
    protocols: Vec<String>,
    /// Unix seconds
    #[serde(default)]
    last_checked: Option<i64>,
}

/// Extractor for paginated JSON proxy APIs (geonode style).
///
/// Pages are fetched in order until the API runs dry, the limit is reached
/// or `max_pages` is hit. A failure after the first page keeps what was
/// already collected and reports the run as partial.
pub struct JsonApiExtractor {
    source_id: String,
    url: Url,
    timeout: Duration,
    max_pages: usize,
    client: Client,
}

impl JsonApiExtractor {
    pub fn new(source_id: &str, url: &str, config: &ExtractorConfig) -> anyhow::Result<Self> {
        Ok(Self {
            source_id: source_id.to_string(),
            url: Url::parse(url)?,
            timeout: config.timeout,
            max_pages: config.max_pages.max(1),
            client: config.build_client()?,
        })
    }

    fn page_url(&self, page: usize, page_size: usize) -> String {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &page_size.to_string())
            .append_pair("page", &page.to_string());
        url.to_string()
    }

    /// Parse one page body into candidates.
    ///
    /// Returns the batch, the number of raw entries on the page and the
    /// total the API reports, if any. Malformed entries are counted, not fatal.
    fn parse_page(&self, body: &str) -> Result<(ExtractBatch, usize, Option<usize>), ExtractionError> {
        let page: Page = serde_json::from_str(body)
            .map_err(|e| ExtractionError::parse(&self.source_id, e.to_string()))?;

        let entries = page.data.len();
        let mut candidates = Vec::new();
        let mut failures = 0;
        for value in page.data {
            match serde_json::from_value::<Entry>(value) {
                Ok(entry) => {
                    let parsed = self.entry_candidates(&entry);
                    if parsed.is_empty() {
                        failures += 1;
                    }
                    candidates.extend(parsed);
                }
                Err(_) => failures += 1,
            }
        }

        Ok((ExtractBatch::new(candidates).with_parse_failures(failures), entries, page.total))
    }

    /// One candidate per advertised protocol
    fn entry_candidates(&self, entry: &Entry) -> Vec<ProxyCandidate> {
        let Some(port) = entry.port.value() else {
            return Vec::new();
        };
        let observed_at = entry
            .last_checked
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        let claim = entry.anonymity_level.as_deref().and_then(AnonymityLevel::from_label);

        let schemes: Vec<ProxyType> = if entry.protocols.is_empty() {
            vec![ProxyType::Http]
        } else {
            entry.protocols.iter().filter_map(|p| p.parse().ok()).collect()
        };

        schemes
            .into_iter()
            .filter_map(|scheme| ProxyCandidate::new(&entry.ip, port, scheme, &self.source_id))
            .map(|c| {
                c.with_country(entry.country.clone())
                    .with_anonymity_claim(claim)
                    .with_observed_at(observed_at)
            })
            .collect()
    }
}

#[async_trait]
impl Extractor for JsonApiExtractor {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn extract(&self, limit: usize) -> Result<ExtractBatch, ExtractionError> {
        let deadline = Instant::now() + self.timeout;
        let page_size = if limit > 0 { limit.min(MAX_PAGE_SIZE) } else { MAX_PAGE_SIZE };

        let mut candidates = Vec::new();
        let mut failures = 0;
        let mut entries_seen = 0;

        for page in 1..=self.max_pages {
            let url = self.page_url(page, page_size);
            let fetched = fetch_text(&self.client, &url, &self.source_id, deadline)
                .await
                .and_then(|body| self.parse_page(&body));

            let (batch, page_entries, total) = match fetched {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(source = %self.source_id, page, error = %e, "page failed");
                    return ExtractBatch::or_partial(candidates, failures, e).map(|b| b.truncate(limit));
                }
            };

            entries_seen += page_entries;
            failures += batch.parse_failures;
            candidates.extend(batch.candidates);

            let exhausted = page_entries < page_size || total.is_some_and(|t| entries_seen >= t);
            if exhausted || (limit > 0 && candidates.len() >= limit) {
                break;
            }
        }

        Ok(ExtractBatch::new(candidates).with_parse_failures(failures).truncate(limit))
    }
}
