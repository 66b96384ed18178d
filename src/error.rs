//! Typed errors for extraction, validation and storage
//!
//! Per-source and per-candidate failures are turned into data by the
//! coordinator and the validation pool; only the errors that describe a
//! structurally invalid request ever reach the caller.

use std::fmt;
use thiserror::Error;

/// Failure of a single source extraction.
#[derive(Debug, Clone, Error)]
#[error("source '{source_id}' failed: {cause}")]
pub struct ExtractionError {
    pub source_id: String,
    pub cause: ExtractionCause,
    /// Network problems and timeouts are worth another attempt, parse and
    /// configuration problems are not.
    pub retryable: bool,
}

impl ExtractionError {
    pub fn new(source_id: impl Into<String>, cause: ExtractionCause) -> Self {
        let retryable = cause.is_retryable();
        Self {
            source_id: source_id.into(),
            cause,
            retryable,
        }
    }

    pub fn timeout(source_id: impl Into<String>) -> Self {
        Self::new(source_id, ExtractionCause::Timeout)
    }

    pub fn network(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source_id, ExtractionCause::Network(message.into()))
    }

    pub fn parse(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(source_id, ExtractionCause::Parse(message.into()))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, ExtractionCause::Timeout)
    }
}

/// Why an extraction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionCause {
    Timeout,
    Network(String),
    /// Non-success HTTP status from the source
    Status(u16),
    Parse(String),
    UnknownSource,
    Construction(String),
    /// The extraction task died without producing a result
    Aborted(String),
}

impl ExtractionCause {
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractionCause::Timeout | ExtractionCause::Network(_) => true,
            // 5xx and 429 are transient on the provider side
            ExtractionCause::Status(code) => *code >= 500 || *code == 429,
            ExtractionCause::Parse(_)
            | ExtractionCause::UnknownSource
            | ExtractionCause::Construction(_)
            | ExtractionCause::Aborted(_) => false,
        }
    }
}

impl fmt::Display for ExtractionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionCause::Timeout => write!(f, "timeout"),
            ExtractionCause::Network(msg) => write!(f, "network error: {}", msg),
            ExtractionCause::Status(code) => write!(f, "HTTP status: {}", code),
            ExtractionCause::Parse(msg) => write!(f, "parse error: {}", msg),
            ExtractionCause::UnknownSource => write!(f, "unknown source"),
            ExtractionCause::Construction(msg) => write!(f, "construction failed: {}", msg),
            ExtractionCause::Aborted(msg) => write!(f, "aborted: {}", msg),
        }
    }
}

/// Errors raised by the extractor registry.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("failed to construct extractor '{name}': {cause}")]
    Construction { name: String, cause: String },
}

impl From<RegistryError> for ExtractionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownSource(name) => {
                ExtractionError::new(name, ExtractionCause::UnknownSource)
            }
            RegistryError::Construction { name, cause } => {
                ExtractionError::new(name, ExtractionCause::Construction(cause))
            }
        }
    }
}

/// Errors that abort a whole extraction run.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no sources selected")]
    NoSourcesSelected,
}

/// Errors from preset validation and lookup.
#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset not found: {0}")]
    NotFound(String),

    #[error("invalid preset '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("failed to read preset file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse preset file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors that reject a validation request before any probing happens.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error("invalid validation request: {0}")]
    InvalidRequest(String),
}

/// Failure of a single probe attempt.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status: {0}")]
    Status(u16),

    /// Anything that is not a network outcome; degrades the whole candidate
    #[error("internal probe error: {0}")]
    Internal(String),
}

impl ProbeError {
    /// Whether this error counts as a failed attempt rather than a broken probe
    pub fn is_network(&self) -> bool {
        !matches!(self, ProbeError::Internal(_))
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}
