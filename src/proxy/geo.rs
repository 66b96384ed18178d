//! Country resolution for candidates using a MaxMind MMDB database

use crate::proxy::models::ProxyCandidate;
use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// GeoLocator for looking up the country of IP addresses
#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// ISO 3166-1 alpha-2 country code for an IP address
    pub fn country_code(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;
        Ok(city.and_then(|c| c.country.iso_code.map(String::from)))
    }

    /// Fill in the country of a candidate the source left blank.
    ///
    /// Hostnames and addresses missing from the database are left untouched.
    pub fn enrich(&self, candidate: ProxyCandidate) -> ProxyCandidate {
        if candidate.country.is_some() {
            return candidate;
        }
        let Some(ip) = parse_ip(&candidate.address) else {
            return candidate;
        };
        match self.country_code(ip) {
            Ok(code) => candidate.with_country(code),
            Err(e) => {
                tracing::trace!(address = %candidate.address, error = %e, "geo lookup failed");
                candidate
            }
        }
    }
}

fn parse_ip(address: &str) -> Option<IpAddr> {
    address.trim_matches(|c| c == '[' || c == ']').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip() {
        assert!(parse_ip("1.2.3.4").is_some());
        assert!(parse_ip("[::1]").is_some());
        assert!(parse_ip("proxy.example.com").is_none());
    }

    #[test]
    fn test_missing_database() {
        assert!(GeoLocator::from_path("/nonexistent/GeoLite2-City.mmdb").is_err());
    }
}
