//! Bounded validation pool
//!
//! Candidates are probed `concurrency` at a time. Every candidate gets a
//! result: network failures become zero scores and unexpected errors or
//! panics become degraded results, so one candidate never aborts the batch.

use crate::error::{ProbeError, ValidationError};
use crate::extract::registry::panic_message;
use crate::proxy::{AnonymityLevel, CandidateKey, ProxyCandidate};
use crate::validate::preset::{PresetStore, ValidationPreset, DEFAULT_PRESET};
use crate::validate::probe::Prober;
use crate::validate::scoring::{self, ProbeSummary, Scores};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The attempts one candidate is put through
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationTarget {
    /// Probed in order until enough succeed
    pub urls: Vec<String>,
    /// Bound on each attempt
    pub timeout: Duration,
    pub min_successful_attempts: u32,
}

impl ValidationTarget {
    pub fn new(urls: Vec<String>, preset: &ValidationPreset) -> Self {
        Self {
            urls,
            timeout: preset.timeout(),
            min_successful_attempts: preset.min_successful_attempts,
        }
    }
}

/// Verdict for one candidate in one validation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub candidate: CandidateKey,
    pub preset: String,
    pub connectivity_score: f64,
    pub speed_score: f64,
    pub anonymity_score: f64,
    pub overall_score: f64,
    pub is_usable: bool,
    pub latency_ms: Option<u64>,
    pub anonymity: Option<AnonymityLevel>,
    pub attempts_made: u32,
    pub successful_attempts: u32,
    /// Why the candidate was degraded, if it was
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationResult {
    fn scored(candidate: CandidateKey, preset: &str, summary: &ProbeSummary, scores: Scores) -> Self {
        let measured = summary.successful_attempts > 0;
        Self {
            candidate,
            preset: preset.to_string(),
            connectivity_score: scores.connectivity,
            speed_score: scores.speed,
            anonymity_score: scores.anonymity,
            overall_score: scores.overall,
            is_usable: scores.is_usable,
            latency_ms: summary.latency_ms.filter(|_| measured),
            anonymity: summary.anonymity.filter(|_| measured),
            attempts_made: summary.attempts_made,
            successful_attempts: summary.successful_attempts,
            error: None,
            checked_at: Utc::now(),
        }
    }

    /// All-zero result for a candidate whose validation broke
    pub fn degraded(candidate: CandidateKey, preset: &str, reason: impl Into<String>) -> Self {
        let scores = Scores::zero();
        let mut result = Self::scored(candidate, preset, &ProbeSummary::default(), scores);
        result.error = Some(reason.into());
        result
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Validation engine over a prober and a preset store
pub struct ValidationPool {
    prober: Arc<dyn Prober>,
    presets: Arc<dyn PresetStore>,
    targets: Vec<String>,
    default_preset: String,
}

impl ValidationPool {
    pub fn new(prober: Arc<dyn Prober>, presets: Arc<dyn PresetStore>, targets: Vec<String>) -> Self {
        Self {
            prober,
            presets,
            targets,
            default_preset: DEFAULT_PRESET.to_string(),
        }
    }

    /// Preset used by [`ValidationPool::quick_validate`]
    pub fn with_default_preset(mut self, name: impl Into<String>) -> Self {
        self.default_preset = name.into();
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn default_preset(&self) -> &str {
        &self.default_preset
    }

    /// Validate every candidate under the named preset.
    ///
    /// The prober is prepared once up front; only the attempts themselves
    /// are bounded by the preset timeout. Returns once each candidate has a
    /// result. Results are unordered; correlate them by
    /// [`ValidationResult::candidate`]. Only a request that cannot run at
    /// all (unknown or invalid preset, unusable target list) is an error.
    pub async fn validate_batch(
        &self,
        candidates: Vec<ProxyCandidate>,
        preset_name: &str,
    ) -> Result<Vec<ValidationResult>, ValidationError> {
        let (preset, target) = self.prepare(preset_name)?;
        self.prober.prepare().await;
        let total = candidates.len();
        let started = Instant::now();
        info!(
            candidates = total,
            preset = %preset.name,
            concurrency = preset.concurrency,
            "starting validation batch"
        );

        let prober = self.prober.as_ref();
        let preset_ref = preset.as_ref();
        let target_ref = &target;
        let results: Vec<ValidationResult> = stream::iter(candidates)
            .map(|candidate| async move {
                validate_candidate(prober, &candidate, target_ref, preset_ref).await
            })
            .buffer_unordered(preset.concurrency)
            .collect()
            .await;

        let usable = results.iter().filter(|r| r.is_usable).count();
        info!(
            candidates = total,
            usable,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "validation batch finished"
        );
        Ok(results)
    }

    /// Validate one candidate under the default preset
    pub async fn quick_validate(
        &self,
        candidate: &ProxyCandidate,
    ) -> Result<ValidationResult, ValidationError> {
        let (preset, target) = self.prepare(&self.default_preset)?;
        self.prober.prepare().await;
        Ok(validate_candidate(self.prober.as_ref(), candidate, &target, &preset).await)
    }

    fn prepare(
        &self,
        preset_name: &str,
    ) -> Result<(Arc<ValidationPreset>, ValidationTarget), ValidationError> {
        let preset = self.presets.get_preset(preset_name)?;
        preset.validate()?;

        if self.targets.is_empty() {
            return Err(ValidationError::InvalidRequest(
                "no validation targets configured".to_string(),
            ));
        }
        if preset.min_successful_attempts as usize > self.targets.len() {
            return Err(ValidationError::InvalidRequest(format!(
                "preset '{}' needs {} successful attempts but only {} targets are configured",
                preset_name,
                preset.min_successful_attempts,
                self.targets.len()
            )));
        }

        let target = ValidationTarget::new(self.targets.clone(), &preset);
        Ok((preset, target))
    }
}

async fn validate_candidate(
    prober: &dyn Prober,
    candidate: &ProxyCandidate,
    target: &ValidationTarget,
    preset: &ValidationPreset,
) -> ValidationResult {
    let probed = AssertUnwindSafe(probe_candidate(prober, candidate, target))
        .catch_unwind()
        .await;

    match probed {
        Ok(Ok(summary)) => {
            let scores = scoring::score(&summary, preset);
            debug!(
                candidate = %candidate,
                successes = summary.successful_attempts,
                attempts = summary.attempts_made,
                overall = scores.overall,
                "candidate scored"
            );
            ValidationResult::scored(candidate.key(), &preset.name, &summary, scores)
        }
        Ok(Err(e)) => {
            warn!(candidate = %candidate, error = %e, "validation degraded");
            ValidationResult::degraded(candidate.key(), &preset.name, e.to_string())
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!(candidate = %candidate, error = %reason, "validation degraded");
            ValidationResult::degraded(candidate.key(), &preset.name, reason)
        }
    }
}

/// Run the attempts for one candidate. Only non-network errors escape.
async fn probe_candidate(
    prober: &dyn Prober,
    candidate: &ProxyCandidate,
    target: &ValidationTarget,
) -> Result<ProbeSummary, ProbeError> {
    let mut attempts_made = 0u32;
    let mut latencies: Vec<Duration> = Vec::new();
    let mut anonymity: Option<AnonymityLevel> = None;

    for url in &target.urls {
        if latencies.len() as u32 >= target.min_successful_attempts {
            break;
        }
        attempts_made += 1;

        let attempt = tokio::time::timeout(target.timeout, prober.probe(candidate, url, target.timeout))
            .await
            .unwrap_or(Err(ProbeError::Timeout));

        match attempt {
            Ok(response) => {
                latencies.push(response.latency);
                if let Some(level) = response.anonymity {
                    anonymity = Some(anonymity.map_or(level, |seen| seen.min(level)));
                }
            }
            Err(e) if e.is_network() => {
                debug!(candidate = %candidate, target = %url, error = %e, "attempt failed");
            }
            Err(e) => return Err(e),
        }
    }

    let successful_attempts = latencies.len() as u32;
    let latency_ms = if latencies.is_empty() {
        None
    } else {
        let total: Duration = latencies.iter().sum();
        Some((total / successful_attempts).as_millis() as u64)
    };

    Ok(ProbeSummary {
        attempts_made,
        successful_attempts,
        latency_ms,
        anonymity,
    })
}
