//! Concrete extractors and the table of built-in sources

mod html_table;
mod json_api;
mod text_list;

pub use html_table::HtmlTableExtractor;
pub use json_api::JsonApiExtractor;
pub use text_list::TextListExtractor;

use super::{Extractor, ExtractorConfig};
use crate::proxy::ProxyType;

/// How a built-in source is fetched and parsed
#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// One proxy per line, served by an API or a raw file
    TextList { url: &'static str, scheme: ProxyType },
    /// An HTML table with IP/Port columns
    HtmlTable { url: &'static str, default_scheme: ProxyType },
    /// A paginated JSON API
    JsonApi { url: &'static str },
}

impl SourceSpec {
    pub fn build(&self, source_id: &str, config: &ExtractorConfig) -> anyhow::Result<Box<dyn Extractor>> {
        let extractor: Box<dyn Extractor> = match self {
            SourceSpec::TextList { url, scheme } => {
                Box::new(TextListExtractor::new(source_id, url, *scheme, config)?)
            }
            SourceSpec::HtmlTable { url, default_scheme } => {
                Box::new(HtmlTableExtractor::new(source_id, url, *default_scheme, config)?)
            }
            SourceSpec::JsonApi { url } => Box::new(JsonApiExtractor::new(source_id, url, config)?),
        };
        Ok(extractor)
    }
}

/// A source shipped with the crate
#[derive(Debug, Clone)]
pub struct BuiltinSource {
    pub id: &'static str,
    pub spec: SourceSpec,
}

impl BuiltinSource {
    const fn new(id: &'static str, spec: SourceSpec) -> Self {
        Self { id, spec }
    }
}

/// Get the list of built-in free proxy sources
pub fn builtin_sources() -> Vec<BuiltinSource> {
    use SourceSpec::*;

    vec![
        BuiltinSource::new(
            "free-proxy-list",
            HtmlTable {
                url: "https://free-proxy-list.net/",
                default_scheme: ProxyType::Http,
            },
        ),
        BuiltinSource::new(
            "sslproxies",
            HtmlTable {
                url: "https://www.sslproxies.org/",
                default_scheme: ProxyType::Https,
            },
        ),
        BuiltinSource::new(
            "us-proxy",
            HtmlTable {
                url: "https://www.us-proxy.org/",
                default_scheme: ProxyType::Http,
            },
        ),
        BuiltinSource::new(
            "socks-proxy",
            HtmlTable {
                url: "https://www.socks-proxy.net/",
                default_scheme: ProxyType::Socks4,
            },
        ),
        BuiltinSource::new(
            "proxyscrape-http",
            TextList {
                url: "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all",
                scheme: ProxyType::Http,
            },
        ),
        BuiltinSource::new(
            "proxyscrape-socks4",
            TextList {
                url: "https://api.proxyscrape.com/v2/?request=getproxies&protocol=socks4&timeout=10000&country=all",
                scheme: ProxyType::Socks4,
            },
        ),
        BuiltinSource::new(
            "proxyscrape-socks5",
            TextList {
                url: "https://api.proxyscrape.com/v2/?request=getproxies&protocol=socks5&timeout=10000&country=all",
                scheme: ProxyType::Socks5,
            },
        ),
        BuiltinSource::new(
            "thespeedx-http",
            TextList {
                url: "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
                scheme: ProxyType::Http,
            },
        ),
        BuiltinSource::new(
            "thespeedx-socks5",
            TextList {
                url: "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
                scheme: ProxyType::Socks5,
            },
        ),
        BuiltinSource::new(
            "monosans-http",
            TextList {
                url: "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
                scheme: ProxyType::Http,
            },
        ),
        BuiltinSource::new(
            "geonode",
            JsonApi {
                url: "https://proxylist.geonode.com/api/proxy-list?sort_by=lastChecked&sort_type=desc",
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SourceKind;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_sources_are_well_formed() {
        let sources = builtin_sources();
        assert!(!sources.is_empty());

        let ids: HashSet<_> = sources.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), sources.len(), "duplicate source ids");

        for source in &sources {
            let url = match &source.spec {
                SourceSpec::TextList { url, .. }
                | SourceSpec::HtmlTable { url, .. }
                | SourceSpec::JsonApi { url } => url,
            };
            assert!(url.starts_with("https://"), "{}", source.id);
        }
    }

    #[test]
    fn test_builtin_sources_build() {
        let config = ExtractorConfig::default();
        for source in builtin_sources() {
            let extractor = source.spec.build(source.id, &config).unwrap();
            assert_eq!(extractor.source_id(), source.id);
            let expected = match source.spec {
                SourceSpec::HtmlTable { .. } => SourceKind::HtmlScraping,
                _ => SourceKind::Api,
            };
            assert_eq!(extractor.kind(), expected);
        }
    }
}
