//! Named validation presets and the store that serves them

use crate::error::PresetError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Tolerance for the weights summing to 1
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Name of the preset used when none is given
pub const DEFAULT_PRESET: &str = "default";

/// Relative weight of each sub-score in the overall score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PresetWeights {
    pub connectivity: f64,
    pub speed: f64,
    pub anonymity: f64,
}

impl PresetWeights {
    pub fn sum(&self) -> f64 {
        self.connectivity + self.speed + self.anonymity
    }
}

/// Tuning parameters for one validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPreset {
    #[serde(default)]
    pub name: String,
    pub connectivity_weight: f64,
    pub speed_weight: f64,
    pub anonymity_weight: f64,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Candidates probed at once
    pub concurrency: usize,
    pub min_successful_attempts: u32,
    /// Minimum overall score (0-100) for a usable verdict
    pub usability_threshold: f64,
    /// Latency that scores zero on speed; defaults to `timeout_ms`
    #[serde(default)]
    pub latency_ceiling_ms: Option<u64>,
}

impl ValidationPreset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        connectivity_weight: f64,
        speed_weight: f64,
        anonymity_weight: f64,
        timeout_ms: u64,
        concurrency: usize,
        min_successful_attempts: u32,
        usability_threshold: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            connectivity_weight,
            speed_weight,
            anonymity_weight,
            timeout_ms,
            concurrency,
            min_successful_attempts,
            usability_threshold,
            latency_ceiling_ms: None,
        }
    }

    pub fn with_latency_ceiling_ms(mut self, ceiling_ms: u64) -> Self {
        self.latency_ceiling_ms = Some(ceiling_ms);
        self
    }

    pub fn weights(&self) -> PresetWeights {
        PresetWeights {
            connectivity: self.connectivity_weight,
            speed: self.speed_weight,
            anonymity: self.anonymity_weight,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn latency_ceiling_ms(&self) -> u64 {
        self.latency_ceiling_ms.unwrap_or(self.timeout_ms)
    }

    /// Reject presets that would make scores meaningless
    pub fn validate(&self) -> Result<(), PresetError> {
        let invalid = |reason: String| {
            Err(PresetError::Invalid {
                name: self.name.clone(),
                reason,
            })
        };

        let weights = self.weights();
        if [weights.connectivity, weights.speed, weights.anonymity]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return invalid("weights must be non-negative numbers".to_string());
        }
        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return invalid(format!("weights sum to {}, expected 1.0", sum));
        }
        if self.timeout_ms == 0 {
            return invalid("timeout_ms must be positive".to_string());
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".to_string());
        }
        if self.min_successful_attempts == 0 {
            return invalid("min_successful_attempts must be at least 1".to_string());
        }
        if !(0.0..=100.0).contains(&self.usability_threshold) {
            return invalid(format!(
                "usability_threshold {} is outside 0-100",
                self.usability_threshold
            ));
        }
        if self.latency_ceiling_ms == Some(0) {
            return invalid("latency_ceiling_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// Presets shipped with the crate
pub fn builtin_presets() -> Vec<ValidationPreset> {
    vec![
        ValidationPreset::new(DEFAULT_PRESET, 0.4, 0.35, 0.25, 5_000, 50, 1, 50.0),
        ValidationPreset::new("fast", 0.3, 0.6, 0.1, 2_000, 100, 1, 40.0),
        ValidationPreset::new("strict", 0.4, 0.2, 0.4, 8_000, 20, 2, 70.0),
        ValidationPreset::new("anonymous", 0.3, 0.1, 0.6, 6_000, 30, 1, 60.0),
    ]
}

/// Lookup contract the validation pool depends on.
///
/// Presets handed out are shared snapshots: replacing a preset never
/// changes one a running batch already holds.
pub trait PresetStore: Send + Sync {
    fn get_preset(&self, name: &str) -> Result<Arc<ValidationPreset>, PresetError>;

    fn put_preset(&self, preset: ValidationPreset) -> Result<(), PresetError>;

    fn delete_preset(&self, name: &str) -> Result<(), PresetError>;

    fn list_presets(&self) -> Vec<String>;
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    #[serde(default)]
    presets: BTreeMap<String, ValidationPreset>,
}

/// In-memory preset store with copy-on-read semantics
#[derive(Debug, Default)]
pub struct InMemoryPresetStore {
    presets: RwLock<HashMap<String, Arc<ValidationPreset>>>,
}

impl InMemoryPresetStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the built-in presets
    pub fn with_builtins() -> Self {
        let store = Self::new();
        {
            let mut presets = store.presets.write().unwrap_or_else(|e| e.into_inner());
            for preset in builtin_presets() {
                presets.insert(preset.name.clone(), Arc::new(preset));
            }
        }
        store
    }

    /// Load `[presets.<name>]` tables from TOML.
    ///
    /// Every preset is validated before any is stored, so a file with one
    /// bad preset changes nothing. Returns the names loaded.
    pub fn load_toml_str(&self, content: &str) -> Result<Vec<String>, PresetError> {
        let file: PresetFile = toml::from_str(content)?;

        let mut loaded = Vec::with_capacity(file.presets.len());
        for (name, mut preset) in file.presets {
            preset.name = name;
            preset.validate()?;
            loaded.push(preset);
        }

        let names = loaded.iter().map(|p| p.name.clone()).collect();
        let mut presets = self.presets.write().unwrap_or_else(|e| e.into_inner());
        for preset in loaded {
            presets.insert(preset.name.clone(), Arc::new(preset));
        }
        Ok(names)
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<String>, PresetError> {
        let content = std::fs::read_to_string(path)?;
        self.load_toml_str(&content)
    }
}

impl PresetStore for InMemoryPresetStore {
    fn get_preset(&self, name: &str) -> Result<Arc<ValidationPreset>, PresetError> {
        self.presets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| PresetError::NotFound(name.to_string()))
    }

    fn put_preset(&self, preset: ValidationPreset) -> Result<(), PresetError> {
        preset.validate()?;
        self.presets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(preset.name.clone(), Arc::new(preset));
        Ok(())
    }

    fn delete_preset(&self, name: &str) -> Result<(), PresetError> {
        self.presets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PresetError::NotFound(name.to_string()))
    }

    fn list_presets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .presets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset(c: f64, s: f64, a: f64) -> ValidationPreset {
        ValidationPreset::new("test", c, s, a, 1_000, 4, 1, 50.0)
    }

    #[test]
    fn test_builtin_presets_are_valid() {
        for preset in builtin_presets() {
            preset.validate().unwrap();
        }
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(preset(0.5, 0.5, 0.0).validate().is_ok());
        assert!(preset(0.1, 0.2, 0.7).validate().is_ok());

        let err = preset(0.4, 0.3, 0.2).validate().unwrap_err();
        assert!(matches!(err, PresetError::Invalid { ref reason, .. } if reason.contains("sum")));
        assert!(preset(0.6, 0.6, 0.0).validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        assert!(preset(1.2, -0.2, 0.0).validate().is_err());
        assert!(preset(f64::NAN, 0.5, 0.5).validate().is_err());
    }

    #[test]
    fn test_other_fields_checked() {
        let mut p = preset(0.5, 0.5, 0.0);
        p.concurrency = 0;
        assert!(p.validate().is_err());

        let mut p = preset(0.5, 0.5, 0.0);
        p.min_successful_attempts = 0;
        assert!(p.validate().is_err());

        let mut p = preset(0.5, 0.5, 0.0);
        p.usability_threshold = 120.0;
        assert!(p.validate().is_err());

        let p = preset(0.5, 0.5, 0.0).with_latency_ceiling_ms(0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_latency_ceiling_defaults_to_timeout() {
        let p = preset(0.5, 0.5, 0.0);
        assert_eq!(p.latency_ceiling_ms(), 1_000);
        assert_eq!(p.with_latency_ceiling_ms(300).latency_ceiling_ms(), 300);
    }

    #[test]
    fn test_store_crud() {
        let store = InMemoryPresetStore::with_builtins();
        assert!(store.list_presets().contains(&DEFAULT_PRESET.to_string()));

        let mut custom = preset(0.5, 0.5, 0.0);
        custom.name = "custom".to_string();
        store.put_preset(custom.clone()).unwrap();
        assert_eq!(*store.get_preset("custom").unwrap(), custom);

        store.delete_preset("custom").unwrap();
        assert!(matches!(store.get_preset("custom"), Err(PresetError::NotFound(_))));
        assert!(store.delete_preset("custom").is_err());
    }

    #[test]
    fn test_store_rejects_invalid_put() {
        let store = InMemoryPresetStore::new();
        assert!(store.put_preset(preset(0.3, 0.3, 0.3)).is_err());
        assert!(store.list_presets().is_empty());
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let store = InMemoryPresetStore::new();
        store.put_preset(preset(0.5, 0.5, 0.0)).unwrap();
        let held = store.get_preset("test").unwrap();

        store.put_preset(preset(0.2, 0.2, 0.6)).unwrap();

        assert_eq!(held.anonymity_weight, 0.0);
        assert_eq!(store.get_preset("test").unwrap().anonymity_weight, 0.6);
    }

    #[test]
    fn test_load_toml() {
        let store = InMemoryPresetStore::new();
        let names = store
            .load_toml_str(
                r#"
[presets.mine]
connectivity_weight = 0.5
speed_weight = 0.3
anonymity_weight = 0.2
timeout_ms = 4000
concurrency = 32
min_successful_attempts = 1
usability_threshold = 55.0
"#,
            )
            .unwrap();

        assert_eq!(names, vec!["mine".to_string()]);
        let mine = store.get_preset("mine").unwrap();
        assert_eq!(mine.name, "mine");
        assert_eq!(mine.latency_ceiling_ms(), 4000);
    }

    #[test]
    fn test_load_toml_rejects_bad_weights_atomically() {
        let store = InMemoryPresetStore::new();
        let result = store.load_toml_str(
            r#"
[presets.good]
connectivity_weight = 0.5
speed_weight = 0.5
anonymity_weight = 0.0
timeout_ms = 1000
concurrency = 2
min_successful_attempts = 1
usability_threshold = 50.0

[presets.bad]
connectivity_weight = 0.4
speed_weight = 0.3
anonymity_weight = 0.2
timeout_ms = 1000
concurrency = 2
min_successful_attempts = 1
usability_threshold = 50.0
"#,
        );

        assert!(matches!(result, Err(PresetError::Invalid { ref name, .. }) if name == "bad"));
        assert!(store.list_presets().is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.toml");
        std::fs::write(&path, "[presets.empty_weights]\nconnectivity_weight = 1.0\nspeed_weight = 0.0\nanonymity_weight = 0.0\ntimeout_ms = 500\nconcurrency = 1\nmin_successful_attempts = 1\nusability_threshold = 0.0\n").unwrap();

        let store = InMemoryPresetStore::new();
        store.load_file(&path).unwrap();
        assert!(store.get_preset("empty_weights").is_ok());

        assert!(matches!(store.load_file(dir.path().join("missing.toml")), Err(PresetError::Io(_))));
    }
}
