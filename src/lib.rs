//! Proxy Harvester - proxy candidate extraction and validation
//!
//! Collects proxy candidates from many independently flaky public sources,
//! merges them, and decides which ones are usable by probing them live and
//! scoring the outcome against named presets.

pub mod error;
pub mod extract;
pub mod proxy;
pub mod store;
pub mod validate;

pub use error::*;
pub use extract::{ExtractionCoordinator, ExtractionRun, ExtractorRegistry};
pub use proxy::*;
pub use store::{ProxyStore, SqliteStore};
pub use validate::{ValidationPool, ValidationResult};

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Default validation target
pub const DEFAULT_TARGET_URL: &str = "http://httpbin.org/get";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL
    pub database_url: String,
    /// URLs every candidate is probed against, in order
    pub target_urls: Vec<String>,
    /// Endpoint used to learn our own egress IP
    pub echo_url: Option<String>,
    /// Path to MMDB file for country lookup (optional)
    pub mmdb_path: Option<String>,
    /// Extra presets in TOML (optional)
    pub preset_file: Option<String>,
    pub default_preset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://proxies.db".to_string(),
            target_urls: vec![DEFAULT_TARGET_URL.to_string()],
            echo_url: Some(validate::DEFAULT_ECHO_URL.to_string()),
            mmdb_path: None,
            preset_file: None,
            default_preset: validate::DEFAULT_PRESET.to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Replace the targets; an empty list keeps the current ones
    pub fn with_target_urls(mut self, urls: Vec<String>) -> Self {
        if !urls.is_empty() {
            self.target_urls = urls;
        }
        self
    }

    pub fn with_echo_url(mut self, url: Option<String>) -> Self {
        self.echo_url = url;
        self
    }

    pub fn with_mmdb_path(mut self, path: Option<String>) -> Self {
        self.mmdb_path = path;
        self
    }

    pub fn with_preset_file(mut self, path: Option<String>) -> Self {
        self.preset_file = path;
        self
    }

    pub fn with_default_preset(mut self, name: impl Into<String>) -> Self {
        self.default_preset = name.into();
        self
    }

    /// Built-in presets plus the preset file, if any
    pub fn preset_store(&self) -> std::result::Result<validate::InMemoryPresetStore, PresetError> {
        let store = validate::InMemoryPresetStore::with_builtins();
        if let Some(path) = &self.preset_file {
            store.load_file(path)?;
        }
        Ok(store)
    }

    /// Country lookup, when an MMDB path is configured
    pub fn geo_locator(&self) -> Result<Option<GeoLocator>> {
        self.mmdb_path
            .as_deref()
            .map(GeoLocator::from_path)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::PresetStore;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.target_urls, vec![DEFAULT_TARGET_URL.to_string()]);
        assert_eq!(config.default_preset, "default");
        assert!(config.mmdb_path.is_none());
        assert!(config.geo_locator().unwrap().is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = Config::new()
            .with_database_url("sqlite::memory:")
            .with_target_urls(vec!["http://a/".to_string(), "http://b/".to_string()])
            .with_echo_url(None)
            .with_default_preset("fast");

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.target_urls.len(), 2);
        assert!(config.echo_url.is_none());
        assert_eq!(config.default_preset, "fast");

        let unchanged = Config::new().with_target_urls(Vec::new());
        assert_eq!(unchanged.target_urls, vec![DEFAULT_TARGET_URL.to_string()]);
    }

    #[test]
    fn test_preset_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.toml");
        std::fs::write(
            &path,
            "[presets.lab]\nconnectivity_weight = 0.6\nspeed_weight = 0.4\nanonymity_weight = 0.0\ntimeout_ms = 3000\nconcurrency = 8\nmin_successful_attempts = 1\nusability_threshold = 60.0\n",
        )
        .unwrap();

        let config = Config::new().with_preset_file(Some(path.display().to_string()));
        let store = config.preset_store().unwrap();
        assert!(store.get_preset("lab").is_ok());
        assert!(store.get_preset("default").is_ok());
    }
}
