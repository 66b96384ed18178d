//! Validation and scoring of proxy candidates
//!
//! - Named presets tune weights, timeouts and concurrency
//! - A [`Prober`] sends single attempts through a candidate
//! - The [`ValidationPool`] runs bounded batches and scores the outcome

pub mod pool;
pub mod preset;
pub mod probe;
pub mod scoring;

pub use pool::{ValidationPool, ValidationResult, ValidationTarget};
pub use preset::{
    builtin_presets, InMemoryPresetStore, PresetStore, PresetWeights, ValidationPreset,
    DEFAULT_PRESET,
};
pub use probe::{classify_response, HttpProber, ProbeResponse, Prober, DEFAULT_ECHO_URL};
pub use scoring::{ProbeSummary, Scores};
