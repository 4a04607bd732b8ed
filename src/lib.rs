// Department Registry Reconciliation Engine - Core Library
// Exposes all modules for use in the CLI, batch jobs, and tests

pub mod error;
pub mod normalize;     // Name canonicalization + variation generation
pub mod scoring;       // Similarity scoring between name strings
pub mod registry;      // Canonical records + registry load/validate
pub mod matching;      // Tiered match resolution + self-dedup
pub mod diff;          // Field-level diffs + change-sets
pub mod safe_update;   // Backup, re-validate, atomic replace
pub mod checkpoint;    // Durable progress for resumable runs
pub mod batch;         // Checkpointed batch runner + retry policy
pub mod approval;      // Injectable approval channel
pub mod ingest;        // Observation sources (CSV, budget text)

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use normalize::{
    clean, default_exclusion_rules, normalize, ExclusionRule, VariationGenerator,
};
pub use scoring::SimilarityScorer;
pub use registry::{DepartmentRecord, Registry, Workforce};
pub use matching::{
    MatchCandidate, MatchResolver, MatchResult, MatchTier, MatcherConfig,
};
pub use diff::{apply, diff, ChangeSet, FieldDiff};
pub use safe_update::{AppliedChange, SafeUpdateManager, DEFAULT_PROTECTED_PATHS};
pub use checkpoint::{Checkpoint, CheckpointStore, RunCounts, UnitOutcome, UnitRecord};
pub use batch::{BatchRunner, ReconcileJob, RetryPolicy, RunReport};
pub use approval::{ApprovalProvider, AutoApproval, ConsoleApproval};
pub use ingest::{load_budget_text, load_csv, parse_budget_lines, Observation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
