//! Pure scoring functions
//!
//! Every sub-score lives in `[0, 1]`; the overall score is the weighted
//! sum scaled to `[0, 100]`.

use crate::proxy::AnonymityLevel;
use crate::validate::preset::{PresetWeights, ValidationPreset};
use serde::Serialize;

/// Raw outcome of probing one candidate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeSummary {
    pub attempts_made: u32,
    pub successful_attempts: u32,
    /// Mean latency of the successful attempts
    pub latency_ms: Option<u64>,
    /// Worst level seen across successful attempts
    pub anonymity: Option<AnonymityLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scores {
    pub connectivity: f64,
    pub speed: f64,
    pub anonymity: f64,
    pub overall: f64,
    pub is_usable: bool,
}

impl Scores {
    /// All-zero, unusable
    pub fn zero() -> Self {
        Self {
            connectivity: 0.0,
            speed: 0.0,
            anonymity: 0.0,
            overall: 0.0,
            is_usable: false,
        }
    }
}

/// Share of attempts that succeeded
pub fn connectivity_score(successful_attempts: u32, attempts_made: u32) -> f64 {
    if attempts_made == 0 {
        return 0.0;
    }
    (f64::from(successful_attempts) / f64::from(attempts_made)).clamp(0.0, 1.0)
}

/// Linear decay from 1 at zero latency to 0 at the ceiling
pub fn speed_score(latency_ms: Option<u64>, ceiling_ms: u64) -> f64 {
    match latency_ms {
        Some(latency) if ceiling_ms > 0 => (1.0 - latency as f64 / ceiling_ms as f64).max(0.0),
        _ => 0.0,
    }
}

pub fn anonymity_score(level: Option<AnonymityLevel>) -> f64 {
    match level {
        Some(AnonymityLevel::Elite) => 1.0,
        Some(AnonymityLevel::Anonymous) => 0.5,
        Some(AnonymityLevel::Transparent) | None => 0.0,
    }
}

pub fn overall_score(weights: &PresetWeights, connectivity: f64, speed: f64, anonymity: f64) -> f64 {
    let weighted = weights.connectivity * connectivity
        + weights.speed * speed
        + weights.anonymity * anonymity;
    (weighted * 100.0).clamp(0.0, 100.0)
}

pub fn is_usable(overall: f64, successful_attempts: u32, preset: &ValidationPreset) -> bool {
    overall >= preset.usability_threshold && successful_attempts >= preset.min_successful_attempts
}

/// Score a probe summary under a preset.
///
/// A candidate with no successful attempt scores zero everywhere,
/// whatever its source claimed about it.
pub fn score(summary: &ProbeSummary, preset: &ValidationPreset) -> Scores {
    if summary.successful_attempts == 0 {
        return Scores::zero();
    }

    let connectivity = connectivity_score(summary.successful_attempts, summary.attempts_made);
    let speed = speed_score(summary.latency_ms, preset.latency_ceiling_ms());
    let anonymity = anonymity_score(summary.anonymity);
    let overall = overall_score(&preset.weights(), connectivity, speed, anonymity);

    Scores {
        connectivity,
        speed,
        anonymity,
        overall,
        is_usable: is_usable(overall, summary.successful_attempts, preset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset() -> ValidationPreset {
        ValidationPreset::new("t", 0.5, 0.5, 0.0, 1_000, 4, 1, 50.0)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_connectivity() {
        assert_eq!(connectivity_score(0, 0), 0.0);
        assert_eq!(connectivity_score(0, 3), 0.0);
        assert!(approx(connectivity_score(1, 2), 0.5));
        assert_eq!(connectivity_score(3, 3), 1.0);
    }

    #[test]
    fn test_speed() {
        assert_eq!(speed_score(None, 1_000), 0.0);
        assert_eq!(speed_score(Some(0), 1_000), 1.0);
        assert!(approx(speed_score(Some(250), 1_000), 0.75));
        assert_eq!(speed_score(Some(1_000), 1_000), 0.0);
        assert_eq!(speed_score(Some(5_000), 1_000), 0.0);
    }

    #[test]
    fn test_anonymity() {
        assert_eq!(anonymity_score(Some(AnonymityLevel::Elite)), 1.0);
        assert_eq!(anonymity_score(Some(AnonymityLevel::Anonymous)), 0.5);
        assert_eq!(anonymity_score(Some(AnonymityLevel::Transparent)), 0.0);
        assert_eq!(anonymity_score(None), 0.0);
    }

    #[test]
    fn test_fast_reliable_candidate() {
        let summary = ProbeSummary {
            attempts_made: 1,
            successful_attempts: 1,
            latency_ms: Some(200),
            anonymity: Some(AnonymityLevel::Elite),
        };
        let scores = score(&summary, &preset());

        assert_eq!(scores.connectivity, 1.0);
        assert!(approx(scores.speed, 0.8));
        assert!(approx(scores.overall, 90.0));
        assert!(scores.is_usable);
    }

    #[test]
    fn test_no_success_scores_zero() {
        let summary = ProbeSummary {
            attempts_made: 2,
            successful_attempts: 0,
            latency_ms: None,
            anonymity: Some(AnonymityLevel::Elite),
        };
        assert_eq!(score(&summary, &preset()), Scores::zero());
    }

    #[test]
    fn test_threshold_boundary() {
        // connectivity 1.0, speed 0.0 under 0.5/0.5 weights lands exactly on 50
        let summary = ProbeSummary {
            attempts_made: 1,
            successful_attempts: 1,
            latency_ms: Some(1_000),
            anonymity: None,
        };
        let scores = score(&summary, &preset());
        assert!(approx(scores.overall, 50.0));
        assert!(scores.is_usable);

        let mut stricter = preset();
        stricter.usability_threshold = 50.01;
        assert!(!score(&summary, &stricter).is_usable);
    }

    #[test]
    fn test_min_successes_gate_usability() {
        let mut p = preset();
        p.min_successful_attempts = 2;
        let summary = ProbeSummary {
            attempts_made: 2,
            successful_attempts: 1,
            latency_ms: Some(0),
            anonymity: None,
        };
        let scores = score(&summary, &p);
        assert!(approx(scores.overall, 75.0));
        assert!(!scores.is_usable);
    }

    #[test]
    fn test_latency_ceiling_override() {
        let p = preset().with_latency_ceiling_ms(400);
        let summary = ProbeSummary {
            attempts_made: 1,
            successful_attempts: 1,
            latency_ms: Some(100),
            anonymity: None,
        };
        assert!(approx(score(&summary, &p).speed, 0.75));
    }
}
