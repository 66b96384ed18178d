//! Merging of candidates from one or many sources

use crate::proxy::{CandidateKey, ProxyCandidate};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// A deduplicated candidate and every source that reported it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedCandidate {
    /// The most recently observed copy
    pub candidate: ProxyCandidate,
    pub sources: BTreeSet<String>,
}

impl MergedCandidate {
    fn new(candidate: ProxyCandidate) -> Self {
        let sources = BTreeSet::from([candidate.source_id.clone()]);
        Self { candidate, sources }
    }

    fn absorb(&mut self, other: ProxyCandidate) {
        self.sources.insert(other.source_id.clone());
        if other.observed_at > self.candidate.observed_at {
            self.candidate = other;
        }
    }

    pub fn key(&self) -> CandidateKey {
        self.candidate.key()
    }
}

/// Collapse candidates sharing `(address, port, scheme)`.
///
/// Duplicates inside one source's output are treated exactly like
/// duplicates across sources. The result is sorted by key.
pub fn merge_candidates<I>(candidates: I) -> Vec<MergedCandidate>
where
    I: IntoIterator<Item = ProxyCandidate>,
{
    let mut merged: HashMap<CandidateKey, MergedCandidate> = HashMap::new();
    for candidate in candidates {
        match merged.get_mut(&candidate.key()) {
            Some(existing) => existing.absorb(candidate),
            None => {
                merged.insert(candidate.key(), MergedCandidate::new(candidate));
            }
        }
    }

    let mut merged: Vec<_> = merged.into_values().collect();
    merged.sort_by(|a, b| a.candidate.key().cmp(&b.candidate.key()));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyType;
    use chrono::{Duration, Utc};

    fn candidate(address: &str, port: u16, scheme: ProxyType, source: &str) -> ProxyCandidate {
        ProxyCandidate::new(address, port, scheme, source).unwrap()
    }

    #[test]
    fn test_self_duplicate_collapses() {
        let a = candidate("1.2.3.4", 8080, ProxyType::Http, "s");
        let merged = merge_candidates(vec![a.clone(), a]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sources.len(), 1);
    }

    #[test]
    fn test_cross_source_keeps_newest_and_unions_sources() {
        let now = Utc::now();
        let older = candidate("1.2.3.4", 8080, ProxyType::Http, "a")
            .with_observed_at(now - Duration::minutes(5))
            .with_country(Some("US".to_string()));
        let newer = candidate("1.2.3.4", 8080, ProxyType::Http, "b").with_observed_at(now);

        for input in [vec![older.clone(), newer.clone()], vec![newer.clone(), older.clone()]] {
            let merged = merge_candidates(input);
            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].candidate.observed_at, now);
            assert_eq!(merged[0].candidate.source_id, "b");
            assert_eq!(
                merged[0].sources,
                BTreeSet::from(["a".to_string(), "b".to_string()])
            );
        }
    }

    #[test]
    fn test_scheme_is_part_of_key() {
        let merged = merge_candidates(vec![
            candidate("1.2.3.4", 8080, ProxyType::Http, "a"),
            candidate("1.2.3.4", 8080, ProxyType::Socks5, "a"),
            candidate("1.2.3.4", 8081, ProxyType::Http, "a"),
        ]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_empty_input() {
        assert!(merge_candidates(Vec::new()).is_empty());
    }
}
