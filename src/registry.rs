// 🏛️ Department Registry - Canonical records + load/validate
//
// The registry is the single shared mutable resource: a JSON array of
// department records loaded once per run, mutated in memory as change-sets
// are approved, persisted through SafeUpdateManager.
//
// Identity fields (org code, parent agency, names) are write-once from this
// engine's view; aliases, notes, and the numeric observation maps are the
// only mutable surface.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// WORKFORCE
// ============================================================================

/// Position counts for one fiscal year.
///
/// Invariant: `filled + vacant == authorized`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workforce {
    pub authorized: f64,
    pub filled: f64,
    pub vacant: f64,
}

impl Workforce {
    pub fn is_consistent(&self) -> bool {
        (self.filled + self.vacant - self.authorized).abs() < 1e-6
    }
}

// ============================================================================
// DEPARTMENT RECORD
// ============================================================================

/// One canonical organization: agency, department, board, or office.
///
/// External observations reconcile against these records; the engine never
/// creates new ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DepartmentRecord {
    /// Display name as it appears in the budget documents
    pub name: String,

    /// The "official" name used as the registry key
    pub canonical_name: String,

    /// Alternative names that map to this record
    /// Example: ["CAL FIRE", "Forestry and Fire Protection"]
    pub aliases: Vec<String>,

    /// Budget reporting status ("active", "defunct", "merged", ...)
    pub budget_status: String,

    /// Four-digit organizational code - write-once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_code: Option<String>,

    /// Parent agency reference - write-once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<String>,

    /// Fiscal year → total spending in dollars
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spending: BTreeMap<String, f64>,

    /// Fiscal year → position counts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workforce: BTreeMap<String, Workforce>,

    /// Free-text annotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Extensible extras (hierarchy level marker, source provenance, ...)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl DepartmentRecord {
    pub fn new(name: &str, budget_status: &str) -> Self {
        DepartmentRecord {
            name: name.to_string(),
            canonical_name: name.to_string(),
            aliases: Vec::new(),
            budget_status: budget_status.to_string(),
            stable_code: None,
            parent_ref: None,
            spending: BTreeMap::new(),
            workforce: BTreeMap::new(),
            note: None,
            metadata: Value::Null,
        }
    }

    /// Add an alias unless it duplicates an existing name.
    pub fn add_alias(&mut self, alias: &str) {
        let known = alias.eq_ignore_ascii_case(&self.canonical_name)
            || alias.eq_ignore_ascii_case(&self.name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias));
        if !known && !alias.trim().is_empty() {
            self.aliases.push(alias.to_string());
        }
    }

    /// Canonical name + display name + aliases.
    pub fn all_names(&self) -> Vec<&str> {
        let mut names = vec![self.canonical_name.as_str()];
        if self.name != self.canonical_name {
            names.push(self.name.as_str());
        }
        names.extend(self.aliases.iter().map(|a| a.as_str()));
        names
    }

    /// Field-level validation messages; empty when the record is sound.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name: required field is empty".to_string());
        }
        if self.canonical_name.trim().is_empty() {
            errors.push("canonicalName: required field is empty".to_string());
        }
        if self.budget_status.trim().is_empty() {
            errors.push("budgetStatus: required field is empty".to_string());
        }

        if let Some(code) = &self.stable_code {
            if code.len() != 4 || !code.chars().all(|c| c.is_ascii_digit()) {
                errors.push(format!("stableCode: expected four digits, got '{}'", code));
            }
        }

        for (year, amount) in &self.spending {
            if !amount.is_finite() || *amount < 0.0 {
                errors.push(format!("spending.{}: invalid amount {}", year, amount));
            }
        }

        for (year, wf) in &self.workforce {
            if !wf.is_consistent() {
                errors.push(format!(
                    "workforce.{}: filled {} + vacant {} != authorized {}",
                    year, wf.filled, wf.vacant, wf.authorized
                ));
            }
        }

        errors
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The full canonical record set, loaded once per run.
#[derive(Debug)]
pub struct Registry {
    pub records: Vec<DepartmentRecord>,
    path: Option<PathBuf>,
}

impl Registry {
    pub fn from_records(records: Vec<DepartmentRecord>) -> Self {
        Registry {
            records,
            path: None,
        }
    }

    /// Load and validate a registry file. Schema violation is fatal.
    pub fn load(path: &Path) -> Result<Registry> {
        let raw = fs::read_to_string(path)?;
        let records: Vec<DepartmentRecord> = serde_json::from_str(&raw).map_err(|e| {
            EngineError::Validation(format!("registry {}: {}", path.display(), e))
        })?;

        let registry = Registry {
            records,
            path: Some(path.to_path_buf()),
        };
        registry.validate()?;

        tracing::info!(
            registry = %path.display(),
            records = registry.records.len(),
            "registry loaded"
        );
        Ok(registry)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Validate every record plus registry-level uniqueness.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        let mut seen: HashSet<String> = HashSet::new();
        for record in &self.records {
            for msg in record.validation_errors() {
                errors.push(format!("'{}': {}", record.canonical_name, msg));
            }
            if !seen.insert(record.canonical_name.to_lowercase()) {
                errors.push(format!(
                    "duplicate canonical name '{}'",
                    record.canonical_name
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(errors.join("; ")))
        }
    }

    pub fn find(&self, canonical_name: &str) -> Option<&DepartmentRecord> {
        self.records
            .iter()
            .find(|r| r.canonical_name.eq_ignore_ascii_case(canonical_name))
    }

    pub fn find_mut(&mut self, canonical_name: &str) -> Option<&mut DepartmentRecord> {
        self.records
            .iter_mut()
            .find(|r| r.canonical_name.eq_ignore_ascii_case(canonical_name))
    }

    pub fn position_of(&self, canonical_name: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.canonical_name.eq_ignore_ascii_case(canonical_name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Content fingerprint of the record set. Checkpoints carry this so a
    /// resume against a drifted registry is detectable.
    pub fn digest(&self) -> Result<String> {
        let serialized = serde_json::to_vec(&self.records)?;
        let mut hasher = Sha256::new();
        hasher.update(&serialized);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cal_fire() -> DepartmentRecord {
        let mut record =
            DepartmentRecord::new("Department of Forestry and Fire Protection", "active");
        record.stable_code = Some("3540".to_string());
        record.parent_ref = Some("Natural Resources Agency".to_string());
        record.add_alias("CAL FIRE");
        record
    }

    #[test]
    fn test_record_roundtrip_uses_camel_case_keys() {
        let record = cal_fire();
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("canonicalName").is_some());
        assert!(json.get("budgetStatus").is_some());
        assert_eq!(json["stableCode"], "3540");
        assert_eq!(json["parentRef"], "Natural Resources Agency");

        let back: DepartmentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.canonical_name, record.canonical_name);
        assert_eq!(back.aliases, record.aliases);
    }

    #[test]
    fn test_add_alias_deduplicates() {
        let mut record = cal_fire();
        record.add_alias("CAL FIRE");
        record.add_alias("cal fire");
        record.add_alias("Department of Forestry and Fire Protection");
        record.add_alias("  ");

        assert_eq!(record.aliases, vec!["CAL FIRE".to_string()]);
    }

    #[test]
    fn test_validation_catches_missing_required_fields() {
        let mut record = cal_fire();
        record.budget_status = String::new();

        let errors = record.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("budgetStatus"));
    }

    #[test]
    fn test_validation_catches_bad_org_code() {
        let mut record = cal_fire();
        record.stable_code = Some("35X0".to_string());
        assert!(record
            .validation_errors()
            .iter()
            .any(|e| e.contains("stableCode")));
    }

    #[test]
    fn test_validation_workforce_consistency() {
        let mut record = cal_fire();
        record.workforce.insert(
            "2023-24".to_string(),
            Workforce {
                authorized: 100.0,
                filled: 80.0,
                vacant: 20.0,
            },
        );
        assert!(record.validation_errors().is_empty());

        record.workforce.insert(
            "2024-25".to_string(),
            Workforce {
                authorized: 100.0,
                filled: 80.0,
                vacant: 10.0,
            },
        );
        assert!(record
            .validation_errors()
            .iter()
            .any(|e| e.contains("workforce.2024-25")));
    }

    #[test]
    fn test_registry_rejects_duplicate_canonical_names() {
        let registry = Registry::from_records(vec![cal_fire(), cal_fire()]);
        let err = registry.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate canonical name"));
    }

    #[test]
    fn test_registry_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, r#"[{"name": "Missing everything"}]"#).unwrap();

        let err = Registry::load(&path).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_registry_load_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let records = vec![cal_fire()];
        fs::write(&path, serde_json::to_string_pretty(&records).unwrap()).unwrap();

        let registry = Registry::load(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry
            .find("Department of Forestry and Fire Protection")
            .is_some());
        assert_eq!(registry.path(), Some(path.as_path()));
    }

    #[test]
    fn test_registry_digest_tracks_content() {
        let registry = Registry::from_records(vec![cal_fire()]);
        let before = registry.digest().unwrap();

        let mut changed = Registry::from_records(vec![cal_fire()]);
        changed.records[0].spending.insert("2023-24".to_string(), 4_200_000.0);
        let after = changed.digest().unwrap();

        assert_ne!(before, after);
        assert_eq!(before, Registry::from_records(vec![cal_fire()]).digest().unwrap());
    }
}
