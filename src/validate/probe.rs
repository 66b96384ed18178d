//! Single probe attempts through a candidate proxy

use crate::error::ProbeError;
use crate::proxy::{AnonymityLevel, ProxyCandidate, ProxyType};
use async_trait::async_trait;
use reqwest::{Client, Proxy, Url};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::OnceCell;
use tokio_socks::tcp::Socks4Stream;
use tracing::{debug, info, warn};

/// Default echo endpoint returning the caller's IP and request headers
pub const DEFAULT_ECHO_URL: &str = "http://httpbin.org/get";

/// Headers a proxy adds when it reveals that it is a proxy
const PROXY_HEADERS: &[&str] = &[
    "via",
    "x-forwarded-for",
    "forwarded",
    "x-real-ip",
    "proxy-connection",
    "x-proxy-id",
    "client-ip",
    "x-client-ip",
];

/// Cap on a response read through a SOCKS4 tunnel
const MAX_SOCKS4_RESPONSE: u64 = 1024 * 1024;

/// Outcome of one successful attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResponse {
    pub latency: Duration,
    /// `None` when the target's response does not allow a verdict
    pub anonymity: Option<AnonymityLevel>,
}

impl ProbeResponse {
    pub fn new(latency: Duration, anonymity: Option<AnonymityLevel>) -> Self {
        Self { latency, anonymity }
    }
}

/// Network seam of the validation pool
#[async_trait]
pub trait Prober: Send + Sync {
    /// One-off setup awaited before a batch, outside any attempt timeout
    async fn prepare(&self) {}

    /// Send one request for `target` through `candidate`.
    ///
    /// Network outcomes come back as [`ProbeError::Timeout`],
    /// [`ProbeError::Network`] or [`ProbeError::Status`]; anything else is
    /// [`ProbeError::Internal`].
    async fn probe(
        &self,
        candidate: &ProxyCandidate,
        target: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError>;
}

/// Prober issuing real HTTP requests through the candidate
pub struct HttpProber {
    direct: Client,
    echo_url: Option<String>,
    real_ip: OnceCell<Option<String>>,
}

impl HttpProber {
    /// `echo_url` is queried once, without a proxy, to learn our own
    /// egress IP. Without it transparent proxies cannot be told apart.
    pub fn new(echo_url: Option<String>) -> reqwest::Result<Self> {
        let direct = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            direct,
            echo_url,
            real_ip: OnceCell::new(),
        })
    }

    /// Use a known egress IP instead of asking the echo endpoint
    pub fn with_real_ip(self, ip: impl Into<String>) -> Self {
        Self {
            real_ip: OnceCell::new_with(Some(Some(ip.into()))),
            ..self
        }
    }

    /// Our own egress IP, fetched on first call
    pub async fn real_ip(&self) -> Option<&str> {
        self.real_ip
            .get_or_init(|| async {
                let url = self.echo_url.as_deref()?;
                match self.fetch_real_ip(url).await {
                    Ok(ip) => {
                        debug!(egress_ip = ?ip, "learned egress IP");
                        ip
                    }
                    Err(e) => {
                        warn!(echo_url = url, error = %e, "could not determine egress IP");
                        None
                    }
                }
            })
            .await
            .as_deref()
    }

    async fn fetch_real_ip(&self, url: &str) -> reqwest::Result<Option<String>> {
        let body = self.direct.get(url).send().await?.error_for_status()?.text().await?;
        Ok(parse_origin(&body))
    }

    /// Egress IP if it is already known; never touches the network
    fn known_real_ip(&self) -> Option<&str> {
        self.real_ip.get().and_then(|ip| ip.as_deref())
    }

    fn client_for(candidate: &ProxyCandidate, timeout: Duration) -> Result<Client, ProbeError> {
        let url = proxy_url(candidate);
        let proxy = Proxy::all(&url)
            .map_err(|e| ProbeError::Internal(format!("unsupported proxy {}: {}", url, e)))?;
        Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Internal(e.to_string()))
    }

    async fn fetch_via_reqwest(
        candidate: &ProxyCandidate,
        target: &str,
        timeout: Duration,
    ) -> Result<String, ProbeError> {
        let client = Self::client_for(candidate, timeout)?;
        let response = client.get(target).send().await.map_err(map_reqwest)?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        response.text().await.map_err(map_reqwest)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn prepare(&self) {
        if let Some(ip) = self.real_ip().await {
            info!(egress_ip = ip, "anonymity checks enabled");
        }
    }

    /// Attempts never look up the egress IP themselves. Without
    /// [`Prober::prepare`] or [`HttpProber::with_real_ip`] no candidate is
    /// reported elite.
    async fn probe(
        &self,
        candidate: &ProxyCandidate,
        target: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        let start = Instant::now();
        let body = match candidate.scheme {
            ProxyType::Socks4 => tokio::time::timeout(timeout, fetch_via_socks4(candidate, target))
                .await
                .unwrap_or(Err(ProbeError::Timeout))?,
            _ => Self::fetch_via_reqwest(candidate, target, timeout).await?,
        };
        let latency = start.elapsed();

        Ok(ProbeResponse::new(
            latency,
            classify_response(&body, self.known_real_ip()),
        ))
    }
}

/// Proxy URL handed to reqwest.
///
/// Lists use `https` for HTTP proxies that accept CONNECT, so those are
/// dialed in plain HTTP like any other HTTP proxy.
pub fn proxy_url(candidate: &ProxyCandidate) -> String {
    match candidate.scheme {
        ProxyType::Https => format!("http://{}:{}", candidate.address, candidate.port),
        _ => candidate.url(),
    }
}

/// GET an `http://` target through a SOCKS4 tunnel.
///
/// SOCKS4 carries IPv4 addresses only, so the target host is resolved here.
async fn fetch_via_socks4(candidate: &ProxyCandidate, target: &str) -> Result<String, ProbeError> {
    let url = Url::parse(target)
        .map_err(|e| ProbeError::Internal(format!("invalid target {}: {}", target, e)))?;
    if url.scheme() != "http" {
        return Err(ProbeError::Internal(format!(
            "{} targets are not supported through socks4",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ProbeError::Internal(format!("target {} has no host", target)))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let destination = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProbeError::Network(format!("cannot resolve {}: {}", host, e)))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| ProbeError::Network(format!("{} has no IPv4 address", host)))?;

    let mut stream = Socks4Stream::connect((candidate.address.as_str(), candidate.port), destination)
        .await
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let host_header = match url.port() {
        Some(p) => format!("{}:{}", host, p),
        None => host.to_string(),
    };
    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        path, host_header
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let mut raw = Vec::new();
    (&mut stream)
        .take(MAX_SOCKS4_RESPONSE)
        .read_to_end(&mut raw)
        .await
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let (status, body) = parse_http_response(&raw)?;
    if !(200..300).contains(&status) {
        return Err(ProbeError::Status(status));
    }
    Ok(body)
}

/// Split a raw HTTP/1.x response into status code and body
fn parse_http_response(raw: &[u8]) -> Result<(u16, String), ProbeError> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| ProbeError::Network("truncated HTTP response".to_string()))?;
    let status = head
        .lines()
        .next()
        .filter(|line| line.starts_with("HTTP/"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| ProbeError::Network("malformed HTTP status line".to_string()))?;
    Ok((status, body.to_string()))
}

fn map_reqwest(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Network(e.to_string())
    }
}

/// First address from an echo response (`origin` or `ip` field)
pub fn parse_origin(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let origin = json
        .get("origin")
        .or_else(|| json.get("ip"))
        .and_then(|v| v.as_str())?;
    origin
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decide the anonymity level from an echo-style JSON body.
///
/// Our real IP anywhere in the body means transparent and proxy headers
/// mean anonymous. Elite is only reported when the real IP is known.
/// Bodies that are not echo responses yield `None`.
pub fn classify_response(body: &str, real_ip: Option<&str>) -> Option<AnonymityLevel> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let headers = json.get("headers").and_then(|h| h.as_object());
    if headers.is_none() && json.get("origin").is_none() {
        return None;
    }

    if let Some(ip) = real_ip {
        if contains_address(&json, ip) {
            return Some(AnonymityLevel::Transparent);
        }
    }

    let reveals_proxy = headers
        .map(|h| h.keys().any(|k| PROXY_HEADERS.contains(&k.to_lowercase().as_str())))
        .unwrap_or(false);
    if reveals_proxy {
        return Some(AnonymityLevel::Anonymous);
    }

    real_ip.map(|_| AnonymityLevel::Elite)
}

fn contains_address(value: &serde_json::Value, ip: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .any(|part| part == ip),
        serde_json::Value::Array(items) => items.iter().any(|v| contains_address(v, ip)),
        serde_json::Value::Object(map) => map.values().any(|v| contains_address(v, ip)),
        _ => false,
    }
}
