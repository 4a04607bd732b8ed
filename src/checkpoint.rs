// 💾 Checkpoint - Durable progress for resumable batch runs
//
// Checkpoint files are timestamp-named JSON inside a checkpoint directory,
// so the latest is selectable by plain name sort. Saves go through a temp
// file + rename; a checkpoint must never be the thing that corrupts a run.

use crate::error::{EngineError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// UNIT OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitOutcome {
    Matched,
    Ambiguous,
    Unmatched,
    Failed,
}

/// One processed unit: the observation id, how it resolved, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: String,
    pub outcome: UnitOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// RUN COUNTS
// ============================================================================

/// Aggregate counts reported at the end of every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub matched: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
    pub failed: usize,
}

impl RunCounts {
    pub fn total(&self) -> usize {
        self.matched + self.ambiguous + self.unmatched + self.failed
    }
}

impl std::fmt::Display for RunCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} matched, {} ambiguous, {} unmatched, {} failed",
            self.matched, self.ambiguous, self.unmatched, self.failed
        )
    }
}

// ============================================================================
// CHECKPOINT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,

    /// Fingerprint of the registry this run started from; resume warns
    /// when the registry drifted underneath the checkpoint
    pub registry_digest: String,

    pub processed_count: usize,
    pub total_count: usize,
    pub last_processed_id: Option<String>,
    pub results: Vec<UnitRecord>,
}

impl Checkpoint {
    pub fn new(run_id: &str, registry_digest: &str, total_count: usize) -> Self {
        Checkpoint {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            registry_digest: registry_digest.to_string(),
            processed_count: 0,
            total_count,
            last_processed_id: None,
            results: Vec::new(),
        }
    }

    /// Record one completed unit.
    pub fn record(&mut self, id: &str, outcome: UnitOutcome, reason: Option<String>) {
        self.results.push(UnitRecord {
            id: id.to_string(),
            outcome,
            reason,
        });
        self.processed_count = self.results.len();
        self.last_processed_id = Some(id.to_string());
    }

    /// Ids already recorded; resume skips these.
    pub fn processed_ids(&self) -> HashSet<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for result in &self.results {
            match result.outcome {
                UnitOutcome::Matched => counts.matched += 1,
                UnitOutcome::Ambiguous => counts.ambiguous += 1,
                UnitOutcome::Unmatched => counts.unmatched += 1,
                UnitOutcome::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

// ============================================================================
// CHECKPOINT STORE
// ============================================================================

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(CheckpointStore {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a checkpoint under a timestamp-sortable name.
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<PathBuf> {
        checkpoint.timestamp = Utc::now();

        let name = format!(
            "checkpoint_{}.json",
            checkpoint
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .replace([':', '.'], "-")
        );
        let path = self.dir.join(&name);
        let temp = self.dir.join(format!("{}.temp", name));

        fs::write(&temp, serde_json::to_string_pretty(checkpoint)?)?;
        fs::rename(&temp, &path)?;

        tracing::debug!(
            checkpoint = %path.display(),
            processed = checkpoint.processed_count,
            total = checkpoint.total_count,
            "checkpoint saved"
        );
        Ok(path)
    }

    /// Load the newest checkpoint, if any. Name sort picks the latest;
    /// an unparseable file is fatal rather than silently skipped.
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("checkpoint_") && name.ends_with(".json"))
            .collect();

        names.sort();
        let Some(latest) = names.last() else {
            return Ok(None);
        };

        let path = self.dir.join(latest);
        let raw = fs::read_to_string(&path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw).map_err(|e| {
            EngineError::Validation(format!("checkpoint {}: {}", path.display(), e))
        })?;

        tracing::info!(
            checkpoint = %path.display(),
            processed = checkpoint.processed_count,
            total = checkpoint.total_count,
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    /// Discard all checkpoints; called on clean completion.
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("checkpoint_") {
                fs::remove_file(entry.path())?;
            }
        }
        tracing::debug!(dir = %self.dir.display(), "checkpoints cleared");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
