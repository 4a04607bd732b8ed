// 🔁 Checkpointed Batch Runner - resolve → diff → approve → apply
//
// Drives the pipeline over large observation lists with resumable
// progress. The run is a single sequential loop: approval prompts and
// backoff waits are blocking suspension points, and process termination
// is the only cancellation - on restart, the latest checkpoint skips every
// recorded unit.

use crate::approval::ApprovalProvider;
use crate::checkpoint::{Checkpoint, CheckpointStore, RunCounts, UnitOutcome};
use crate::diff::ChangeSet;
use crate::error::{EngineError, Result};
use crate::ingest::Observation;
use crate::matching::{MatchResolver, MatchResult};
use crate::registry::Registry;
use crate::safe_update::SafeUpdateManager;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Bounded exponential backoff for rate-limit signals. Any other error
/// is recorded immediately, not retried.
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3)
    pub max_retries: u32,

    /// First backoff wait (default: 500ms)
    pub base_delay: Duration,

    /// Backoff ceiling (default: 8s)
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    /// No waiting; unit tests and offline sources.
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2_u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }

    /// Run a unit, retrying only on rate-limit errors.
    pub fn run<T, F>(&self, unit_id: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn() {
                Err(e) if e.is_rate_limited() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        unit = unit_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// Aggregate result of a batch run. No outcome is silently dropped:
/// every unit lands in exactly one count.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub counts: RunCounts,
    pub total_count: usize,

    /// Units skipped because a checkpoint had already recorded them
    pub resumed_count: usize,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "run {}: {} of {} units processed ({} resumed from checkpoint); {}; details in the run log",
            self.run_id,
            self.counts.total(),
            self.total_count,
            self.resumed_count,
            self.counts
        )
    }
}

// ============================================================================
// BATCH RUNNER
// ============================================================================

pub struct BatchRunner {
    store: CheckpointStore,
    pub retry: RetryPolicy,

    /// Persist the checkpoint after every N units (default: 25)
    pub checkpoint_interval: usize,
}

impl BatchRunner {
    pub fn new(store: CheckpointStore) -> Self {
        BatchRunner {
            store,
            retry: RetryPolicy::new(),
            checkpoint_interval: 25,
        }
    }

    pub fn with_retry(store: CheckpointStore, retry: RetryPolicy) -> Self {
        BatchRunner {
            store,
            retry,
            checkpoint_interval: 25,
        }
    }

    /// Process every observation not already recorded in the latest
    /// checkpoint. The handler classifies one unit; unit-level errors are
    /// recorded and the batch continues, registry-level errors abort.
    pub fn run<F>(
        &self,
        registry_digest: &str,
        observations: &[Observation],
        mut handler: F,
    ) -> Result<RunReport>
    where
        F: FnMut(&Observation) -> Result<(UnitOutcome, Option<String>)>,
    {
        let mut checkpoint = match self.store.latest()? {
            Some(existing) => {
                if existing.registry_digest != registry_digest {
                    tracing::warn!(
                        checkpoint_digest = %existing.registry_digest,
                        registry_digest = %registry_digest,
                        "registry changed since checkpoint was written"
                    );
                }
                tracing::info!(
                    run_id = %existing.run_id,
                    processed = existing.processed_count,
                    "resuming from checkpoint"
                );
                existing
            }
            None => Checkpoint::new(
                &Uuid::new_v4().to_string(),
                registry_digest,
                observations.len(),
            ),
        };

        let resumed_count = checkpoint.processed_count;
        let processed: std::collections::HashSet<String> = checkpoint
            .processed_ids()
            .iter()
            .map(|id| id.to_string())
            .collect();
        let mut since_save = 0;

        for observation in observations {
            if processed.contains(&observation.id) {
                continue;
            }

            let (outcome, reason) =
                match self.retry.run(&observation.id, || handler(observation)) {
                    Ok(result) => result,
                    Err(e) if e.is_unit_level() => {
                        tracing::error!(unit = %observation.id, error = %e, "unit failed");
                        (UnitOutcome::Failed, Some(e.to_string()))
                    }
                    Err(e) => {
                        // Registry integrity at risk: persist progress, abort
                        tracing::error!(unit = %observation.id, error = %e, "aborting run");
                        self.store.save(&mut checkpoint)?;
                        return Err(e);
                    }
                };

            checkpoint.record(&observation.id, outcome, reason);
            since_save += 1;

            if since_save >= self.checkpoint_interval {
                self.store.save(&mut checkpoint)?;
                since_save = 0;
            }
        }

        self.store.save(&mut checkpoint)?;
        let report = RunReport {
            run_id: checkpoint.run_id.clone(),
            counts: checkpoint.counts(),
            total_count: checkpoint.total_count.max(checkpoint.processed_count),
            resumed_count,
        };

        // Clean finish: progress is fully reflected in the report and the
        // registry file, so the checkpoint has served its purpose
        self.store.clear()?;

        tracing::info!(run_id = %report.run_id, summary = %report.summary(), "run complete");
        Ok(report)
    }
}

// ============================================================================
// RECONCILE JOB
// ============================================================================

/// The standard per-unit handler: resolve the raw name, build a
/// change-set from the observation, seek approval, apply safely.
pub struct ReconcileJob<'a, A: ApprovalProvider> {
    pub resolver: MatchResolver,
    pub updater: SafeUpdateManager,
    pub approval: &'a mut A,
}

impl<'a, A: ApprovalProvider> ReconcileJob<'a, A> {
    pub fn new(resolver: MatchResolver, updater: SafeUpdateManager, approval: &'a mut A) -> Self {
        ReconcileJob {
            resolver,
            updater,
            approval,
        }
    }

    /// Handle one observation against the registry.
    pub fn handle(
        &mut self,
        registry: &mut Registry,
        observation: &Observation,
    ) -> Result<(UnitOutcome, Option<String>)> {
        let candidate = match self.resolver.resolve(&observation.raw_name, registry) {
            MatchResult::Matched(candidate) => candidate,
            MatchResult::Ambiguous { candidates, .. } => {
                let names: Vec<String> =
                    candidates.iter().map(|c| c.canonical_name.clone()).collect();
                return Ok((
                    UnitOutcome::Ambiguous,
                    Some(format!("candidates: {}", names.join(" | "))),
                ));
            }
            MatchResult::Unmatched { .. } => {
                return Ok((UnitOutcome::Unmatched, Some("below threshold".to_string())))
            }
        };

        let change = self.build_change(registry, observation, &candidate.canonical_name)?;
        if change.is_empty() {
            return Ok((
                UnitOutcome::Matched,
                Some(format!("{}; no field changes", candidate.reason)),
            ));
        }

        tracing::info!(
            unit = %observation.id,
            record = %candidate.canonical_name,
            diff = %change.summary(),
            "proposing change"
        );

        if !self.approval.propose_change(&change, candidate.score)? {
            return Ok((
                UnitOutcome::Matched,
                Some("change rejected by reviewer".to_string()),
            ));
        }

        self.updater.apply_change(registry, &change)?;
        Ok((
            UnitOutcome::Matched,
            Some(format!("applied {} field(s)", change.diffs.len())),
        ))
    }

    /// Derive the proposed mutation from an observation: per-year spending
    /// and, for fuzzy matches, the raw surface form as a new alias.
    fn build_change(
        &self,
        registry: &Registry,
        observation: &Observation,
        canonical_name: &str,
    ) -> Result<ChangeSet> {
        let record = registry
            .find(canonical_name)
            .ok_or_else(|| EngineError::RecordNotFound(canonical_name.to_string()))?;

        // Scraped org codes are noisier than names; a mismatch is worth a
        // warning but not a rejection
        if let (Some(observed), Some(stored)) = (observation.org_code(), record.stable_code.as_deref())
        {
            if observed != stored {
                tracing::warn!(
                    unit = %observation.id,
                    record = canonical_name,
                    observed_code = observed,
                    stored_code = stored,
                    "org code mismatch"
                );
            }
        }

        let mut updated = record.clone();

        if let Some(amount) = observation.amount() {
            updated.spending.insert(observation.source_year.clone(), amount);
        }

        let raw = observation.raw_name.trim();
        let known = record.all_names().iter().any(|n| n.eq_ignore_ascii_case(raw));
        if !known {
            updated.add_alias(raw);
        }

        Ok(ChangeSet::between(
            canonical_name,
            &serde_json::to_value(record)?,
            &serde_json::to_value(&updated)?,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
