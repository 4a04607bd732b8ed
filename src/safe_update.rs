// 🛡️ Safe Update Manager - Backup, re-validate, atomic replace
//
// Guarantee: the on-disk registry is never observed partially written or
// invalid; every accepted mutation has a restorable backup.
//
// Write protocol:
//   1. Reject any change-set touching a protected field (no partial apply)
//   2. Copy the registry to `<registry>.backup`
//   3. Apply in memory, re-validate schema + cross-field consistency
//   4. Write `<registry>.temp`, re-parse and re-validate it
//   5. Atomically rename the temp file over the original
//   6. Any failure after step 2: restore from backup, report WriteError

use crate::diff::{self, ChangeSet};
use crate::error::{EngineError, Result};
use crate::registry::{DepartmentRecord, Registry};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// APPLIED CHANGE
// ============================================================================

/// Receipt for a successfully persisted change-set.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub record_id: String,
    pub paths: Vec<String>,
    pub backup_path: PathBuf,
}

// ============================================================================
// SAFE UPDATE MANAGER
// ============================================================================

pub struct SafeUpdateManager {
    registry_path: PathBuf,

    /// Dotted-path prefixes this engine is never permitted to mutate.
    /// Identity and hierarchy anchors by default.
    pub protected_paths: Vec<String>,
}

/// Identity/hierarchy anchors; write-once from this engine's view.
pub const DEFAULT_PROTECTED_PATHS: &[&str] = &["stableCode", "parentRef", "name", "canonicalName"];

impl SafeUpdateManager {
    pub fn new(registry_path: &Path) -> Self {
        SafeUpdateManager {
            registry_path: registry_path.to_path_buf(),
            protected_paths: DEFAULT_PROTECTED_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    pub fn with_protected_paths(registry_path: &Path, protected: Vec<String>) -> Self {
        SafeUpdateManager {
            registry_path: registry_path.to_path_buf(),
            protected_paths: protected,
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        path_with_suffix(&self.registry_path, "backup")
    }

    pub fn temp_path(&self) -> PathBuf {
        path_with_suffix(&self.registry_path, "temp")
    }

    /// Apply an approved change-set to the registry, in memory and on disk.
    pub fn apply_change(
        &self,
        registry: &mut Registry,
        change: &ChangeSet,
    ) -> Result<AppliedChange> {
        // 1. Protected fields: reject outright, no partial apply
        for field_diff in &change.diffs {
            for protected in &self.protected_paths {
                if field_diff.path == *protected
                    || field_diff.path.starts_with(&format!("{}.", protected))
                {
                    tracing::warn!(
                        record = %change.record_id,
                        path = %field_diff.path,
                        "rejected: protected field"
                    );
                    return Err(EngineError::ProtectedField(field_diff.path.clone()));
                }
            }
        }

        let position = registry
            .position_of(&change.record_id)
            .ok_or_else(|| EngineError::RecordNotFound(change.record_id.clone()))?;

        // 2. Snapshot before any write
        let backup_path = self.backup_path();
        fs::copy(&self.registry_path, &backup_path).map_err(|e| {
            EngineError::Write(format!("backup to {}: {}", backup_path.display(), e))
        })?;

        // 3. Apply in memory and re-validate
        let updated = self.apply_in_memory(&registry.records[position], change)?;

        let mut candidate_records = registry.records.clone();
        candidate_records[position] = updated;
        let candidate = Registry::from_records(candidate_records);
        candidate.validate()?;

        // 4-5. Stage to temp, verify, atomically replace; 6. rollback
        match self.write_verified(&candidate) {
            Ok(()) => {}
            Err(e) => {
                self.restore_backup();
                return Err(e);
            }
        }

        registry.records = candidate.records;

        tracing::info!(
            record = %change.record_id,
            paths = ?change.touched_paths(),
            registry = %self.registry_path.display(),
            "change applied"
        );

        Ok(AppliedChange {
            record_id: change.record_id.clone(),
            paths: change.touched_paths().iter().map(|p| p.to_string()).collect(),
            backup_path,
        })
    }

    /// Patch one record through its JSON form. A serde round-trip enforces
    /// the schema; explicit validation covers cross-field consistency.
    fn apply_in_memory(
        &self,
        record: &DepartmentRecord,
        change: &ChangeSet,
    ) -> Result<DepartmentRecord> {
        let mut value = serde_json::to_value(record)?;
        diff::apply(&mut value, &change.diffs)?;

        let updated: DepartmentRecord = serde_json::from_value(value)
            .map_err(|e| EngineError::Validation(format!("change-set produced invalid record: {}", e)))?;

        let errors = updated.validation_errors();
        if !errors.is_empty() {
            tracing::warn!(
                record = %change.record_id,
                errors = ?errors,
                "change rejected by validation, disk untouched"
            );
            return Err(EngineError::Validation(errors.join("; ")));
        }

        Ok(updated)
    }

    /// Write to the temp file, verify it re-parses and re-validates, then
    /// rename over the original.
    fn write_verified(&self, candidate: &Registry) -> Result<()> {
        let temp_path = self.temp_path();

        let serialized = serde_json::to_string_pretty(&candidate.records)
            .map_err(|e| EngineError::Write(format!("serialize registry: {}", e)))?;
        fs::write(&temp_path, serialized)
            .map_err(|e| EngineError::Write(format!("write {}: {}", temp_path.display(), e)))?;

        // Trust nothing: the temp file must load exactly like the original
        Registry::load(&temp_path)
            .map_err(|e| EngineError::Write(format!("temp file failed verification: {}", e)))?;

        fs::rename(&temp_path, &self.registry_path).map_err(|e| {
            EngineError::Write(format!(
                "rename {} -> {}: {}",
                temp_path.display(),
                self.registry_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    fn restore_backup(&self) {
        let backup_path = self.backup_path();
        match fs::copy(&backup_path, &self.registry_path) {
            Ok(_) => {
                tracing::warn!(registry = %self.registry_path.display(), "restored from backup")
            }
            Err(e) => tracing::error!(
                registry = %self.registry_path.display(),
                backup = %backup_path.display(),
                error = %e,
                "backup restore failed"
            ),
        }
        let _ = fs::remove_file(self.temp_path());
    }
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".");
    os_string.push(suffix);
    PathBuf::from(os_string)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FieldDiff;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn write_registry(dir: &TempDir) -> (PathBuf, Registry) {
        let mut record =
            DepartmentRecord::new("Department of Forestry and Fire Protection", "active");
        record.stable_code = Some("3540".to_string());
        record.add_alias("CAL FIRE");

        let path = dir.path().join("registry.json");
        fs::write(&path, serde_json::to_string_pretty(&vec![record]).unwrap()).unwrap();
        let registry = Registry::load(&path).unwrap();
        (path, registry)
    }

    fn spending_change() -> ChangeSet {
        ChangeSet {
            record_id: "Department of Forestry and Fire Protection".to_string(),
            diffs: vec![FieldDiff {
                path: "spending.2023-24".to_string(),
                before: Value::Null,
                after: json!(4_200_000_000.0),
            }],
        }
    }

    #[test]
    fn test_apply_persists_and_backs_up() {
        let dir = TempDir::new().unwrap();
        let (path, mut registry) = write_registry(&dir);
        let manager = SafeUpdateManager::new(&path);

        let applied = manager.apply_change(&mut registry, &spending_change()).unwrap();
        assert_eq!(applied.paths, vec!["spending.2023-24"]);
        assert!(applied.backup_path.exists());

        // In-memory view updated
        let record = registry.find("Department of Forestry and Fire Protection").unwrap();
        assert_eq!(record.spending.get("2023-24"), Some(&4_200_000_000.0));

        // On-disk file re-parses with the change
        let reloaded = Registry::load(&path).unwrap();
        let record = reloaded.find("Department of Forestry and Fire Protection").unwrap();
        assert_eq!(record.spending.get("2023-24"), Some(&4_200_000_000.0));

        // No stray temp file
        assert!(!manager.temp_path().exists());
    }

    #[test]
    fn test_protected_field_rejected_without_partial_apply() {
        let dir = TempDir::new().unwrap();
        let (path, mut registry) = write_registry(&dir);
        let manager = SafeUpdateManager::new(&path);
        let original = fs::read_to_string(&path).unwrap();

        let change = ChangeSet {
            record_id: "Department of Forestry and Fire Protection".to_string(),
            diffs: vec![
                FieldDiff {
                    path: "note".to_string(),
                    before: Value::Null,
                    after: json!("harmless"),
                },
                FieldDiff {
                    path: "stableCode".to_string(),
                    before: json!("3540"),
                    after: json!("9999"),
                },
            ],
        };

        let err = manager.apply_change(&mut registry, &change).unwrap_err();
        assert!(matches!(err, EngineError::ProtectedField(_)));

        // Nothing applied: not even the harmless diff in the same set
        let record = registry.find("Department of Forestry and Fire Protection").unwrap();
        assert!(record.note.is_none());
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_validation_failure_leaves_disk_untouched() {
        let dir = TempDir::new().unwrap();
        let (path, mut registry) = write_registry(&dir);
        let manager = SafeUpdateManager::new(&path);
        let original = fs::read_to_string(&path).unwrap();

        // Bucket counts must sum: 90 + 5 != 100
        let change = ChangeSet {
            record_id: "Department of Forestry and Fire Protection".to_string(),
            diffs: vec![FieldDiff {
                path: "workforce.2023-24".to_string(),
                before: Value::Null,
                after: json!({"authorized": 100.0, "filled": 90.0, "vacant": 5.0}),
            }],
        };

        let err = manager.apply_change(&mut registry, &change).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let record = registry.find("Department of Forestry and Fire Protection").unwrap();
        assert!(record.workforce.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_unknown_record_rejected() {
        let dir = TempDir::new().unwrap();
        let (path, mut registry) = write_registry(&dir);
        let manager = SafeUpdateManager::new(&path);

        let change = ChangeSet {
            record_id: "Department of Nowhere".to_string(),
            diffs: vec![],
        };
        let err = manager.apply_change(&mut registry, &change).unwrap_err();
        assert!(matches!(err, EngineError::RecordNotFound(_)));
    }

    #[test]
    fn test_crash_between_temp_write_and_rename_is_harmless() {
        let dir = TempDir::new().unwrap();
        let (path, registry) = write_registry(&dir);
        let manager = SafeUpdateManager::new(&path);
        let original = fs::read_to_string(&path).unwrap();

        // Simulate a crash that left a half-written temp file behind
        fs::write(manager.temp_path(), "{ not even json").unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.len(), registry.len());
        assert_eq!(fs::read_to_string(&path).unwrap(), original);

        // The next successful apply replaces the stale temp file
        let mut registry = reloaded;
        manager.apply_change(&mut registry, &spending_change()).unwrap();
        assert!(!manager.temp_path().exists());
        Registry::load(&path).unwrap();
    }

    #[test]
    fn test_custom_protected_paths() {
        let dir = TempDir::new().unwrap();
        let (path, mut registry) = write_registry(&dir);
        let manager = SafeUpdateManager::with_protected_paths(&path, vec!["note".to_string()]);

        let change = ChangeSet {
            record_id: "Department of Forestry and Fire Protection".to_string(),
            diffs: vec![FieldDiff {
                path: "note".to_string(),
                before: Value::Null,
                after: json!("blocked"),
            }],
        };
        assert!(matches!(
            manager.apply_change(&mut registry, &change).unwrap_err(),
            EngineError::ProtectedField(_)
        ));

        // stableCode is no longer protected under the custom list
        let change = ChangeSet {
            record_id: "Department of Forestry and Fire Protection".to_string(),
            diffs: vec![FieldDiff {
                path: "stableCode".to_string(),
                before: json!("3540"),
                after: json!("3541"),
            }],
        };
        assert!(manager.apply_change(&mut registry, &change).is_ok());
    }
}
