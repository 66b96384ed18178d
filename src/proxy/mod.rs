//! Proxy module for modelling and parsing proxy candidates
//!
//! This module provides functionality for:
//! - The candidate record every extractor produces
//! - Parsing candidates from various text formats (IP:PORT, scheme://IP:PORT, etc.)
//! - Country lookup for candidates through a MaxMind database

pub mod geo;
pub mod models;
pub mod parser;

pub use geo::GeoLocator;
pub use models::{AnonymityLevel, CandidateKey, ProxyCandidate, ProxyType};
pub use parser::{ParsedLine, ParsedText, ProxyParser};
