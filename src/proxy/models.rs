//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proxy scheme enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" | "socks4a" => Ok(ProxyType::Socks4),
            "socks5" | "socks5h" => Ok(ProxyType::Socks5),
            other => Err(format!(
                "Invalid proxy type: {}. Use: http, https, socks4, socks5",
                other
            )),
        }
    }
}

/// How much of the client's identity a proxy leaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymityLevel {
    Transparent,
    Anonymous,
    Elite,
}

impl AnonymityLevel {
    /// Interpret the free-form labels proxy lists use
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return None;
        }
        if label.contains("elite") || label.contains("high") || label == "hia" {
            Some(AnonymityLevel::Elite)
        } else if label.contains("transparent") || label == "noa" {
            Some(AnonymityLevel::Transparent)
        } else if label.contains("anonymous") || label == "anm" {
            Some(AnonymityLevel::Anonymous)
        } else {
            None
        }
    }
}

impl fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonymityLevel::Transparent => write!(f, "transparent"),
            AnonymityLevel::Anonymous => write!(f, "anonymous"),
            AnonymityLevel::Elite => write!(f, "elite"),
        }
    }
}

/// Uniqueness key of a candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateKey {
    pub address: String,
    pub port: u16,
    pub scheme: ProxyType,
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.address, self.port)
    }
}

/// Unvalidated proxy endpoint produced by an extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub address: String,
    pub port: u16,
    pub scheme: ProxyType,
    pub country: Option<String>,
    pub anonymity_claim: Option<AnonymityLevel>,
    pub source_id: String,
    pub observed_at: DateTime<Utc>,
}

impl ProxyCandidate {
    /// Create a candidate observed now.
    ///
    /// Returns `None` for an empty address or port 0. The address is
    /// lowercased so hostnames compare the same way IPs do.
    pub fn new(address: &str, port: u16, scheme: ProxyType, source_id: &str) -> Option<Self> {
        let address = address.trim().to_lowercase();
        if address.is_empty() || port == 0 {
            return None;
        }
        Some(Self {
            address,
            port,
            scheme,
            country: None,
            anonymity_claim: None,
            source_id: source_id.to_string(),
            observed_at: Utc::now(),
        })
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty() && c != "UNKNOWN" && c != "-");
        self
    }

    pub fn with_anonymity_claim(mut self, claim: Option<AnonymityLevel>) -> Self {
        self.anonymity_claim = claim;
        self
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    pub fn key(&self) -> CandidateKey {
        CandidateKey {
            address: self.address.clone(),
            port: self.port,
            scheme: self.scheme,
        }
    }

    /// Get the proxy URL string
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.address, self.port)
    }

    /// Get the proxy string in IP:PORT format
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_creation() {
        let candidate = ProxyCandidate::new("127.0.0.1", 8080, ProxyType::Http, "test").unwrap();
        assert_eq!(candidate.address, "127.0.0.1");
        assert_eq!(candidate.port, 8080);
        assert_eq!(candidate.scheme, ProxyType::Http);
        assert_eq!(candidate.source_id, "test");
        assert!(candidate.country.is_none());
        assert!(candidate.anonymity_claim.is_none());
    }

    #[test]
    fn test_candidate_rejects_invalid() {
        assert!(ProxyCandidate::new("", 8080, ProxyType::Http, "test").is_none());
        assert!(ProxyCandidate::new("   ", 8080, ProxyType::Http, "test").is_none());
        assert!(ProxyCandidate::new("127.0.0.1", 0, ProxyType::Http, "test").is_none());
    }

    #[test]
    fn test_candidate_key_normalizes_host() {
        let a = ProxyCandidate::new("Proxy.Example.COM", 3128, ProxyType::Http, "a").unwrap();
        let b = ProxyCandidate::new("proxy.example.com ", 3128, ProxyType::Http, "b").unwrap();
        assert_eq!(a.key(), b.key());

        let c = ProxyCandidate::new("proxy.example.com", 3128, ProxyType::Socks5, "b").unwrap();
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_candidate_url() {
        let candidate = ProxyCandidate::new("192.168.1.1", 1080, ProxyType::Socks5, "t").unwrap();
        assert_eq!(candidate.url(), "socks5://192.168.1.1:1080");
        assert_eq!(candidate.to_simple_string(), "192.168.1.1:1080");
        assert_eq!(candidate.key().to_string(), "socks5://192.168.1.1:1080");
    }

    #[test]
    fn test_country_normalization() {
        let candidate = ProxyCandidate::new("1.1.1.1", 80, ProxyType::Http, "t").unwrap();
        assert_eq!(
            candidate.clone().with_country(Some("us".to_string())).country,
            Some("US".to_string())
        );
        assert_eq!(candidate.clone().with_country(Some("Unknown".to_string())).country, None);
        assert_eq!(candidate.with_country(Some(" ".to_string())).country, None);
    }

    #[test]
    fn test_proxy_type_from_str() {
        assert_eq!("HTTP".parse::<ProxyType>(), Ok(ProxyType::Http));
        assert_eq!("socks5h".parse::<ProxyType>(), Ok(ProxyType::Socks5));
        assert_eq!("socks4".parse::<ProxyType>(), Ok(ProxyType::Socks4));
        assert!("ftp".parse::<ProxyType>().is_err());
    }

    #[test]
    fn test_anonymity_labels() {
        assert_eq!(AnonymityLevel::from_label("elite proxy"), Some(AnonymityLevel::Elite));
        assert_eq!(AnonymityLevel::from_label("High Anonymous"), Some(AnonymityLevel::Elite));
        assert_eq!(AnonymityLevel::from_label("anonymous"), Some(AnonymityLevel::Anonymous));
        assert_eq!(AnonymityLevel::from_label("transparent"), Some(AnonymityLevel::Transparent));
        assert_eq!(AnonymityLevel::from_label("noa"), Some(AnonymityLevel::Transparent));
        assert_eq!(AnonymityLevel::from_label(""), None);
        assert_eq!(AnonymityLevel::from_label("???"), None);
    }

    #[test]
    fn test_anonymity_ordering() {
        assert!(AnonymityLevel::Transparent < AnonymityLevel::Anonymous);
        assert!(AnonymityLevel::Anonymous < AnonymityLevel::Elite);
    }
}
