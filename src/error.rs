// ⚠️ Error Taxonomy - One enum for every failure the engine can surface
//
// Per-unit errors (Validation, AmbiguousMatch, Unmatched, RateLimited) are
// recorded in the checkpoint and the batch continues. Registry-level errors
// (Write) abort the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed registry or change-set. The unit is aborted, never
    /// partially applied.
    #[error("validation failed: {0}")]
    Validation(String),

    /// More than one candidate cleared the acceptance threshold.
    /// Always surfaced, never auto-resolved.
    #[error("ambiguous match for '{name}': {} candidates over threshold", .candidates.len())]
    AmbiguousMatch {
        name: String,
        candidates: Vec<String>,
    },

    /// No candidate cleared the acceptance threshold.
    #[error("no match for '{0}'")]
    Unmatched(String),

    /// Registry persistence failed. Triggers rollback and aborts the run.
    #[error("write failed: {0}")]
    Write(String),

    /// Upstream rate-limit signal. Retried with bounded backoff, then
    /// recorded as failed.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The change-set touches a field this engine is never permitted to
    /// mutate (identity/hierarchy anchors).
    #[error("protected field '{0}' cannot be modified")]
    ProtectedField(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Unit-level errors are caught and logged into the checkpoint;
    /// everything else puts the shared registry at risk and aborts.
    pub fn is_unit_level(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::AmbiguousMatch { .. }
                | EngineError::Unmatched(_)
                | EngineError::RateLimited(_)
                | EngineError::ProtectedField(_)
                | EngineError::RecordNotFound(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, EngineError::RateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// TESTS
// ============================================================================
