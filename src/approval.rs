// ✋ Approval Channel - Injectable review capability
//
// Blocking console review is a terminal dependency, so it lives behind a
// trait: batch jobs swap in an automated policy without touching the
// resolver, differ, or updater.

use crate::diff::ChangeSet;
use crate::error::Result;
use std::io::{BufRead, Write};

// ============================================================================
// APPROVAL PROVIDER
// ============================================================================

/// Capability to approve or reject a proposed change-set.
pub trait ApprovalProvider {
    /// Present a change-set (with the match confidence that produced it)
    /// and return whether it may be applied.
    fn propose_change(&mut self, change: &ChangeSet, score: f64) -> Result<bool>;
}

// ============================================================================
// CONSOLE APPROVAL
// ============================================================================

/// Interactive review on stdin/stdout. The pipeline blocks until the
/// reviewer answers.
pub struct ConsoleApproval;

impl ConsoleApproval {
    pub fn new() -> Self {
        ConsoleApproval
    }

    fn prompt<R: BufRead, W: Write>(
        &self,
        change: &ChangeSet,
        score: f64,
        input: &mut R,
        output: &mut W,
    ) -> Result<bool> {
        writeln!(output, "\nProposed change for '{}':", change.record_id)?;
        for diff in &change.diffs {
            writeln!(output, "  {}", diff)?;
        }
        writeln!(output, "  (match confidence {:.2})", score)?;

        loop {
            write!(output, "Apply? [y/n] ")?;
            output.flush()?;

            let mut answer = String::new();
            if input.read_line(&mut answer)? == 0 {
                // EOF on stdin: treat as rejection, never as consent
                tracing::warn!(record = %change.record_id, "approval input closed, rejecting");
                return Ok(false);
            }

            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                other => {
                    writeln!(output, "Please answer y or n (got '{}')", other)?;
                }
            }
        }
    }
}

impl Default for ConsoleApproval {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalProvider for ConsoleApproval {
    fn propose_change(&mut self, change: &ChangeSet, score: f64) -> Result<bool> {
        tracing::info!(record = %change.record_id, summary = %change.summary(), score, "approval prompt");

        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let approved = self.prompt(change, score, &mut stdin.lock(), &mut stdout.lock())?;

        tracing::info!(record = %change.record_id, approved, "approval answer");
        Ok(approved)
    }
}

// ============================================================================
// AUTO APPROVAL
// ============================================================================

/// Automated policy: approve when the match confidence clears a floor.
pub struct AutoApproval {
    /// Minimum confidence to auto-approve (default: 0.95)
    pub min_score: f64,
}

impl AutoApproval {
    pub fn new() -> Self {
        AutoApproval { min_score: 0.95 }
    }

    pub fn with_min_score(min_score: f64) -> Self {
        AutoApproval { min_score }
    }
}

impl Default for AutoApproval {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalProvider for AutoApproval {
    fn propose_change(&mut self, change: &ChangeSet, score: f64) -> Result<bool> {
        let approved = score >= self.min_score;
        tracing::info!(
            record = %change.record_id,
            summary = %change.summary(),
            score,
            min_score = self.min_score,
            approved,
            "auto approval"
        );
        Ok(approved)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FieldDiff;
    use serde_json::json;

    fn sample_change() -> ChangeSet {
        ChangeSet {
            record_id: "Department of Forestry and Fire Protection".to_string(),
            diffs: vec![FieldDiff {
                path: "spending.2023-24".to_string(),
                before: json!(null),
                after: json!(4_200_000_000.0),
            }],
        }
    }

    #[test]
    fn test_auto_approval_threshold() {
        let mut policy = AutoApproval::new();
        let change = sample_change();

        assert!(policy.propose_change(&change, 0.97).unwrap());
        assert!(policy.propose_change(&change, 0.95).unwrap());
        assert!(!policy.propose_change(&change, 0.90).unwrap());
    }

    #[test]
    fn test_auto_approval_custom_floor() {
        let mut policy = AutoApproval::with_min_score(0.80);
        assert!(policy.propose_change(&sample_change(), 0.85).unwrap());
    }

    #[test]
    fn test_console_prompt_yes_no() {
        let console = ConsoleApproval::new();
        let change = sample_change();

        let mut output = Vec::new();
        let approved = console
            .prompt(&change, 0.9, &mut "y\n".as_bytes(), &mut output)
            .unwrap();
        assert!(approved);

        let rejected = console
            .prompt(&change, 0.9, &mut "no\n".as_bytes(), &mut Vec::<u8>::new())
            .unwrap();
        assert!(!rejected);

        let prompt_text = String::from_utf8(output).unwrap();
        assert!(prompt_text.contains("spending.2023-24"));
        assert!(prompt_text.contains("0.90"));
    }

    #[test]
    fn test_console_prompt_retries_garbage_then_accepts() {
        let console = ConsoleApproval::new();
        let mut output = Vec::new();

        let approved = console
            .prompt(&sample_change(), 0.9, &mut "maybe\nyes\n".as_bytes(), &mut output)
            .unwrap();
        assert!(approved);
        assert!(String::from_utf8(output).unwrap().contains("Please answer"));
    }

    #[test]
    fn test_console_prompt_eof_rejects() {
        let console = ConsoleApproval::new();
        let approved = console
            .prompt(&sample_change(), 0.9, &mut "".as_bytes(), &mut Vec::<u8>::new())
            .unwrap();
        assert!(!approved);
    }
}
