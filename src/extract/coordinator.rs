//! Concurrent extraction across many sources
//!
//! One task per selected source runs under a global concurrency cap. The
//! coordinator itself is the only writer of the run state: it drains
//! completed tasks one at a time, so outcomes and candidates never need a
//! shared lock. Sources still running at the run deadline are aborted and
//! recorded as timeouts.

use super::dedup::{merge_candidates, MergedCandidate};
use super::registry::{panic_message, ExtractorRegistry};
use super::retry::{RetryDecision, RetryPolicy};
use super::{ExtractBatch, ExtractorConfig};
use crate::error::{CoordinatorError, ExtractionCause, ExtractionError};
use crate::proxy::{GeoLocator, ProxyCandidate};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of sources extracted at once
const DEFAULT_CONCURRENCY: usize = 8;

/// Default budget for a whole run in seconds
const DEFAULT_DEADLINE_SECS: u64 = 120;

/// Configuration for the extraction coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Sources extracted at once
    pub concurrency: usize,
    /// Budget for the whole run; sources still running are cancelled
    pub deadline: Duration,
    /// Limit passed to each extractor (0 means unlimited)
    pub per_source_limit: usize,
    pub retry: RetryPolicy,
    pub extractor: ExtractorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            per_source_limit: 0,
            retry: RetryPolicy::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_per_source_limit(mut self, limit: usize) -> Self {
        self.per_source_limit = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_extractor_config(mut self, extractor: ExtractorConfig) -> Self {
        self.extractor = extractor;
        self
    }
}

/// How a source fared in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Success,
    /// Candidates were returned alongside an error
    Partial,
    Failure,
}

/// Outcome of one source in one run
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub status: SourceStatus,
    /// Candidates the source contributed before deduplication
    pub count: usize,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ExtractionError>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub parse_failures: usize,
}

impl SourceOutcome {
    fn failure(error: ExtractionError, duration: Duration, attempts: u32) -> Self {
        Self {
            status: SourceStatus::Failure,
            count: 0,
            error: Some(error),
            duration_ms: duration.as_millis() as u64,
            attempts,
            parse_failures: 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_ref().is_some_and(ExtractionError::is_timeout)
    }
}

fn serialize_error<S: Serializer>(error: &Option<ExtractionError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.cause.to_string()),
        None => s.serialize_none(),
    }
}

/// One execution of the coordinator across a set of sources.
///
/// Only the coordinator builds runs; once returned a run is never modified.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    per_source_outcome: BTreeMap<String, SourceOutcome>,
    total_candidates: usize,
    candidates: Vec<MergedCandidate>,
}

impl ExtractionRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn per_source_outcome(&self) -> &BTreeMap<String, SourceOutcome> {
        &self.per_source_outcome
    }

    pub fn outcome(&self, source_id: &str) -> Option<&SourceOutcome> {
        self.per_source_outcome.get(source_id)
    }

    /// Number of candidates after deduplication
    pub fn total_candidates(&self) -> usize {
        self.total_candidates
    }

    pub fn candidates(&self) -> &[MergedCandidate] {
        &self.candidates
    }

    pub fn into_candidates(self) -> Vec<MergedCandidate> {
        self.candidates
    }

    /// The newest copy of every unique candidate
    pub fn proxy_candidates(&self) -> Vec<ProxyCandidate> {
        self.candidates.iter().map(|m| m.candidate.clone()).collect()
    }

    pub fn count_with_status(&self, status: SourceStatus) -> usize {
        self.per_source_outcome.values().filter(|o| o.status == status).count()
    }
}

/// What a source task hands back to the coordinator
struct SourceReport {
    source_id: String,
    result: Result<ExtractBatch, ExtractionError>,
    attempts: u32,
    duration: Duration,
}

/// Mutable run state, owned by the coordinator while tasks are in flight
struct RunRecorder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    outcomes: BTreeMap<String, SourceOutcome>,
    collected: Vec<ProxyCandidate>,
}

impl RunRecorder {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            outcomes: BTreeMap::new(),
            collected: Vec::new(),
        }
    }

    fn record(&mut self, report: SourceReport, geo: Option<&GeoLocator>) {
        let duration_ms = report.duration.as_millis() as u64;
        let outcome = match report.result {
            Ok(batch) => {
                let status = if batch.is_partial() {
                    SourceStatus::Partial
                } else {
                    SourceStatus::Success
                };
                let count = batch.candidates.len();
                match geo {
                    Some(geo) => self.collected.extend(batch.candidates.into_iter().map(|c| geo.enrich(c))),
                    None => self.collected.extend(batch.candidates),
                }
                SourceOutcome {
                    status,
                    count,
                    error: batch.error,
                    duration_ms,
                    attempts: report.attempts,
                    parse_failures: batch.parse_failures,
                }
            }
            Err(error) => SourceOutcome::failure(error, report.duration, report.attempts),
        };

        match outcome.status {
            SourceStatus::Failure => warn!(
                source = %report.source_id,
                attempts = outcome.attempts,
                error = ?outcome.error.as_ref().map(|e| e.cause.to_string()),
                "source failed"
            ),
            _ => debug!(
                source = %report.source_id,
                status = ?outcome.status,
                count = outcome.count,
                duration_ms,
                "source finished"
            ),
        }
        self.outcomes.insert(report.source_id, outcome);
    }

    fn record_failure(&mut self, error: ExtractionError, duration: Duration) {
        warn!(source = %error.source_id, error = %error.cause, "source did not finish");
        let source_id = error.source_id.clone();
        self.outcomes.insert(source_id, SourceOutcome::failure(error, duration, 0));
    }

    fn finish(self) -> ExtractionRun {
        let candidates = merge_candidates(self.collected);
        ExtractionRun {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            per_source_outcome: self.outcomes,
            total_candidates: candidates.len(),
            candidates,
        }
    }
}

/// Runs extractors concurrently and merges their output
pub struct ExtractionCoordinator {
    registry: Arc<ExtractorRegistry>,
    config: CoordinatorConfig,
    geo_locator: Option<GeoLocator>,
    history: Mutex<BTreeMap<String, SourceOutcome>>,
}

impl ExtractionCoordinator {
    pub fn new(registry: Arc<ExtractorRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            registry,
            config,
            geo_locator: None,
            history: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fill in missing countries from a MaxMind database
    pub fn with_geo_locator(mut self, geo_locator: GeoLocator) -> Self {
        self.geo_locator = Some(geo_locator);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Most recent outcome of every source this coordinator has run
    pub fn source_history(&self) -> BTreeMap<String, SourceOutcome> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Extract from `source_ids`, or from every registered source when `None`.
    ///
    /// Individual source failures end up in the run's outcomes; the only
    /// error is an empty selection.
    pub async fn run_extraction(&self, source_ids: Option<&[String]>) -> Result<ExtractionRun, CoordinatorError> {
        let selected: Vec<String> = match source_ids {
            Some(ids) => {
                let mut seen = HashSet::new();
                ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
            }
            None => self.registry.list_available().into_iter().collect(),
        };
        if selected.is_empty() {
            return Err(CoordinatorError::NoSourcesSelected);
        }

        let mut recorder = RunRecorder::start();
        let started = Instant::now();
        info!(run_id = %recorder.run_id, sources = selected.len(), "starting extraction run");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut pending: HashSet<String> = selected.iter().cloned().collect();
        let mut tasks = JoinSet::new();
        for source_id in selected {
            tasks.spawn(run_source(
                source_id,
                Arc::clone(&self.registry),
                self.config.clone(),
                Arc::clone(&semaphore),
            ));
        }

        let deadline = tokio::time::sleep(self.config.deadline);
        tokio::pin!(deadline);
        let mut timed_out = false;

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(report)) => {
                        pending.remove(&report.source_id);
                        recorder.record(report, self.geo_locator.as_ref());
                    }
                    Some(Err(e)) => warn!(error = %e, "extraction task ended abnormally"),
                    None => break,
                },
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
            }
        }

        // abort and wait, so in-flight requests are dropped and their
        // connections released before the run returns
        tasks.shutdown().await;

        let elapsed = started.elapsed();
        for source_id in pending {
            let error = if timed_out {
                ExtractionError::timeout(source_id)
            } else {
                ExtractionError::new(source_id, ExtractionCause::Aborted("task terminated".to_string()))
            };
            recorder.record_failure(error, elapsed);
        }

        let run = recorder.finish();
        info!(
            run_id = %run.run_id,
            total_candidates = run.total_candidates,
            succeeded = run.count_with_status(SourceStatus::Success),
            partial = run.count_with_status(SourceStatus::Partial),
            failed = run.count_with_status(SourceStatus::Failure),
            elapsed_ms = elapsed.as_millis() as u64,
            "extraction run finished"
        );

        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(run.per_source_outcome.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(run)
    }
}

/// Task body for one source: wait for a slot, construct, extract with retries.
async fn run_source(
    source_id: String,
    registry: Arc<ExtractorRegistry>,
    config: CoordinatorConfig,
    semaphore: Arc<Semaphore>,
) -> SourceReport {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return SourceReport {
            result: Err(ExtractionError::new(
                &source_id,
                ExtractionCause::Aborted("semaphore closed".to_string()),
            )),
            source_id,
            attempts: 0,
            duration: Duration::ZERO,
        };
    };

    let started = Instant::now();
    let attempt = AssertUnwindSafe(extract_with_retry(&source_id, &registry, &config))
        .catch_unwind()
        .await;
    let (result, attempts) = match attempt {
        Ok(done) => done,
        Err(payload) => (
            Err(ExtractionError::new(
                &source_id,
                ExtractionCause::Aborted(panic_message(payload.as_ref())),
            )),
            1,
        ),
    };

    SourceReport {
        source_id,
        result,
        attempts,
        duration: started.elapsed(),
    }
}

async fn extract_with_retry(
    source_id: &str,
    registry: &ExtractorRegistry,
    config: &CoordinatorConfig,
) -> (Result<ExtractBatch, ExtractionError>, u32) {
    let extractor = match registry.create(source_id, &config.extractor) {
        Ok(extractor) => extractor,
        Err(e) => return (Err(e.into()), 0),
    };

    let mut retry = config.retry.start();
    loop {
        let attempt = retry.begin_attempt();
        match extractor.extract(config.per_source_limit).await {
            Ok(batch) => return (Ok(batch), attempt),
            Err(error) => match retry.on_failure(&error) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(source = source_id, attempt, ?delay, error = %error.cause, "retrying source");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => return (Err(error), attempt),
            },
        }
    }
}
