use crate::error::ExtractionError;
use crate::extract::{fetch_text, ExtractBatch, Extractor, ExtractorConfig, SourceKind};
use crate::proxy::{AnonymityLevel, ProxyCandidate, ProxyParser, ProxyType};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio::time::Instant;

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("Invalid table selector"));
static HEADER_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("Invalid th selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("Invalid tr selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("Invalid td selector"));

/// Column positions located from a table header
#[derive(Debug, Default, PartialEq)]
struct Columns {
    ip: usize,
    port: usize,
    country: Option<usize>,
    anonymity: Option<usize>,
    https: Option<usize>,
    version: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Option<Self> {
        Some(Self {
            ip: find(headers, |h| h == "ip" || h.starts_with("ip ") || h.contains("address"))?,
            port: find(headers, |h| h == "port")?,
            country: find(headers, |h| h == "code" || h == "country code"),
            anonymity: find(headers, |h| h.contains("anonymity")),
            https: find(headers, |h| h == "https"),
            version: find(headers, |h| h == "version" || h == "protocol"),
        })
    }
}

fn find(headers: &[String], pred: impl Fn(&str) -> bool) -> Option<usize> {
    headers.iter().position(|h| pred(h.as_str()))
}

/// Extractor for sites that publish proxies as an HTML table
/// (the free-proxy-list.net family)
pub struct HtmlTableExtractor {
    source_id: String,
    url: String,
    default_scheme: ProxyType,
    timeout: Duration,
    client: Client,
}

impl HtmlTableExtractor {
    pub fn new(
        source_id: &str,
        url: &str,
        default_scheme: ProxyType,
        config: &ExtractorConfig,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            source_id: source_id.to_string(),
            url: url.to_string(),
            default_scheme,
            timeout: config.timeout,
            client: config.build_client()?,
        })
    }

    /// Parse a page.
    ///
    /// The first table whose header names IP and port columns wins. Pages
    /// without such a table fall back to scanning the text for `IP:PORT`;
    /// a page with neither is a layout mismatch.
    pub fn parse(&self, html: &str) -> Result<ExtractBatch, ExtractionError> {
        let document = Html::parse_document(html);

        for table in document.select(&TABLE) {
            let headers: Vec<String> = table
                .select(&HEADER_CELL)
                .map(|th| cell_text(&th).to_lowercase())
                .collect();
            let Some(columns) = Columns::from_headers(&headers) else {
                continue;
            };
            return Ok(self.parse_rows(table, &columns));
        }

        let text: String = document.root_element().text().collect::<Vec<_>>().join("\n");
        let candidates = ProxyParser::extract_with_regex(&text, self.default_scheme, &self.source_id);
        if candidates.is_empty() {
            return Err(ExtractionError::parse(&self.source_id, "no proxy table found"));
        }
        Ok(ExtractBatch::new(candidates))
    }

    fn parse_rows(&self, table: ElementRef<'_>, columns: &Columns) -> ExtractBatch {
        let mut candidates = Vec::new();
        let mut failures = 0;

        for row in table.select(&ROW) {
            let cells: Vec<String> = row.select(&CELL).map(|td| cell_text(&td)).collect();
            // header rows have no <td>
            if cells.is_empty() {
                continue;
            }
            match self.parse_row(&cells, columns) {
                Some(candidate) => candidates.push(candidate),
                None => failures += 1,
            }
        }

        ExtractBatch::new(candidates).with_parse_failures(failures)
    }

    fn parse_row(&self, cells: &[String], columns: &Columns) -> Option<ProxyCandidate> {
        let address = cells.get(columns.ip)?;
        let port: u16 = cells.get(columns.port)?.parse().ok()?;
        let cell = |index: Option<usize>| index.and_then(|i| cells.get(i)).map(String::as_str);

        let scheme = match (cell(columns.version), cell(columns.https)) {
            (Some(version), _) => version.parse().unwrap_or(self.default_scheme),
            (None, Some(https)) if https.eq_ignore_ascii_case("yes") => ProxyType::Https,
            _ => self.default_scheme,
        };

        let candidate = ProxyCandidate::new(address, port, scheme, &self.source_id)?
            .with_country(cell(columns.country).map(String::from))
            .with_anonymity_claim(cell(columns.anonymity).and_then(AnonymityLevel::from_label));
        Some(candidate)
    }
}

fn cell_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[async_trait]
impl Extractor for HtmlTableExtractor {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::HtmlScraping
    }

    async fn extract(&self, limit: usize) -> Result<ExtractBatch, ExtractionError> {
        let deadline = Instant::now() + self.timeout;
        let body = fetch_text(&self.client, &self.url, &self.source_id, deadline).await?;
        let batch = self.parse(&body)?.truncate(limit);
        tracing::debug!(
            source = %self.source_id,
            candidates = batch.candidates.len(),
            parse_failures = batch.parse_failures,
            "scraped proxy table"
        );
        Ok(batch)
    }
}
