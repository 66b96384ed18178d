use crate::error::ExtractionError;
use crate::extract::{fetch_text, ExtractBatch, Extractor, ExtractorConfig, SourceKind};
use crate::proxy::{ProxyParser, ProxyType};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;

/// Extractor for plain-text proxy lists (one `IP:PORT` per line)
pub struct TextListExtractor {
    source_id: String,
    url: String,
    scheme: ProxyType,
    timeout: Duration,
    client: Client,
}

impl TextListExtractor {
    pub fn new(source_id: &str, url: &str, scheme: ProxyType, config: &ExtractorConfig) -> reqwest::Result<Self> {
        Ok(Self {
            source_id: source_id.to_string(),
            url: url.to_string(),
            scheme,
            timeout: config.timeout,
            client: config.build_client()?,
        })
    }

    /// Parse a downloaded list body
    pub fn parse(&self, body: &str) -> ExtractBatch {
        let parsed = ProxyParser::parse_text(body, self.scheme, &self.source_id);
        ExtractBatch::new(parsed.candidates).with_parse_failures(parsed.invalid_lines)
    }
}

#[async_trait]
impl Extractor for TextListExtractor {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn extract(&self, limit: usize) -> Result<ExtractBatch, ExtractionError> {
        let deadline = Instant::now() + self.timeout;
        let body = fetch_text(&self.client, &self.url, &self.source_id, deadline).await?;
        let batch = self.parse(&body).truncate(limit);
        tracing::debug!(
            source = %self.source_id,
            candidates = batch.candidates.len(),
            parse_failures = batch.parse_failures,
            "parsed text list"
        );
        Ok(batch)
    }
}
