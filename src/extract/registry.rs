//! Name → constructor table for extractors

use super::sources::builtin_sources;
use super::{Extractor, ExtractorConfig};
use crate::error::RegistryError;
use once_cell::sync::OnceCell;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

/// Builds an extractor from the shared extractor configuration
pub type ExtractorConstructor =
    Arc<dyn Fn(&ExtractorConfig) -> anyhow::Result<Box<dyn Extractor>> + Send + Sync>;

/// Registry of extractor constructors.
///
/// Built-in sources are installed lazily on first use, exactly once.
/// Registering an existing name replaces the previous constructor, which is
/// how callers override a built-in or inject a test double. Nothing touches
/// the network until [`ExtractorRegistry::create`] is called.
pub struct ExtractorRegistry {
    constructors: RwLock<HashMap<String, ExtractorConstructor>>,
    builtins: OnceCell<()>,
    with_builtins: bool,
}

impl ExtractorRegistry {
    /// Registry preloaded with the built-in sources
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
            builtins: OnceCell::new(),
            with_builtins: true,
        }
    }

    /// Registry with no sources at all
    pub fn empty() -> Self {
        Self {
            with_builtins: false,
            ..Self::new()
        }
    }

    fn ensure_builtins(&self) {
        if !self.with_builtins {
            return;
        }
        self.builtins.get_or_init(|| {
            let mut table = self.write_table();
            for source in builtin_sources() {
                let spec = source.spec.clone();
                let id = source.id;
                let constructor: ExtractorConstructor =
                    Arc::new(move |config: &ExtractorConfig| spec.build(id, config));
                table.insert(id.to_string(), constructor);
            }
        });
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ExtractorConstructor>> {
        self.constructors.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ExtractorConstructor>> {
        self.constructors.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a constructor under `name`; last registration wins
    pub fn register<F>(&self, name: &str, constructor: F)
    where
        F: Fn(&ExtractorConfig) -> anyhow::Result<Box<dyn Extractor>> + Send + Sync + 'static,
    {
        self.ensure_builtins();
        self.write_table().insert(name.to_string(), Arc::new(constructor));
        tracing::debug!(source = name, "registered extractor");
    }

    /// Construct the extractor registered under `name`
    pub fn create(&self, name: &str, config: &ExtractorConfig) -> Result<Box<dyn Extractor>, RegistryError> {
        self.ensure_builtins();
        let constructor = self
            .read_table()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))?;

        // the lock is released before running foreign code
        match panic::catch_unwind(AssertUnwindSafe(|| constructor(config))) {
            Ok(Ok(extractor)) => Ok(extractor),
            Ok(Err(e)) => Err(RegistryError::Construction {
                name: name.to_string(),
                cause: format!("{:#}", e),
            }),
            Err(payload) => Err(RegistryError::Construction {
                name: name.to_string(),
                cause: panic_message(payload.as_ref()),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ensure_builtins();
        self.read_table().contains_key(name)
    }

    /// Names of all registered sources, sorted
    pub fn list_available(&self) -> BTreeSet<String> {
        self.ensure_builtins();
        self.read_table().keys().cloned().collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::extract::{ExtractBatch, SourceKind};
    use async_trait::async_trait;

    struct Fixed(&'static str, usize);

    #[async_trait]
    impl Extractor for Fixed {
        fn source_id(&self) -> &str {
            self.0
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Api
        }

        async fn extract(&self, _limit: usize) -> Result<ExtractBatch, ExtractionError> {
            Ok(ExtractBatch::default().with_parse_failures(self.1))
        }
    }

    #[test]
    fn test_builtins_listed() {
        let registry = ExtractorRegistry::new();
        let names = registry.list_available();
        assert!(names.contains("free-proxy-list"));
        assert!(names.contains("geonode"));
        assert_eq!(names.len(), builtin_sources().len());
    }

    #[test]
    fn test_empty_registry() {
        let registry = ExtractorRegistry::empty();
        assert!(registry.list_available().is_empty());
        assert!(!registry.contains("free-proxy-list"));
    }

    #[test]
    fn test_unknown_source() {
        let registry = ExtractorRegistry::empty();
        let err = registry.create("missing", &ExtractorConfig::default()).err().unwrap();
        assert!(matches!(err, RegistryError::UnknownSource(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = ExtractorRegistry::new();
        registry.register("free-proxy-list", |_| Ok(Box::new(Fixed("free-proxy-list", 7))));
        registry.register("double", |_| Ok(Box::new(Fixed("double", 1))));
        registry.register("double", |_| Ok(Box::new(Fixed("double", 2))));

        let config = ExtractorConfig::default();
        let overridden = registry.create("free-proxy-list", &config).unwrap();
        assert_eq!(overridden.extract(0).await.unwrap().parse_failures, 7);

        let double = registry.create("double", &config).unwrap();
        assert_eq!(double.extract(0).await.unwrap().parse_failures, 2);
        assert_eq!(registry.list_available().len(), builtin_sources().len() + 1);
    }

    #[test]
    fn test_construction_error() {
        let registry = ExtractorRegistry::empty();
        registry.register("broken", |_| Err(anyhow::anyhow!("bad url")));
        registry.register("panics", |_| panic!("constructor exploded"));

        let config = ExtractorConfig::default();
        match registry.create("broken", &config) {
            Err(RegistryError::Construction { name, cause }) => {
                assert_eq!(name, "broken");
                assert!(cause.contains("bad url"));
            }
            _ => panic!("expected construction error"),
        }
        match registry.create("panics", &config) {
            Err(RegistryError::Construction { cause, .. }) => assert!(cause.contains("constructor exploded")),
            _ => panic!("expected construction error"),
        }
    }

    #[test]
    fn test_concurrent_queries() {
        let registry = Arc::new(ExtractorRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register(&format!("extra-{}", i), |_| Ok(Box::new(Fixed("extra", 0))));
                    registry.list_available().len()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap() > builtin_sources().len());
        }
        assert_eq!(registry.list_available().len(), builtin_sources().len() + 8);
    }
}
