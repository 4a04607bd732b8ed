// 🔀 Diff Engine - Field-level differences between two record versions
//
// Diffs are keyed by dotted path ("spending.2023-24"). Recursion stops at
// arrays and primitives: both are compared as atomic units by full
// equality, so an order-significant list like aliases never produces a
// spurious partial-array diff.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// FIELD DIFF
// ============================================================================

/// One changed field. `before`/`after` of `Null` means the key is absent
/// on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub path: String,
    pub before: Value,
    pub after: Value,
}

impl std::fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.path, self.before, self.after)
    }
}

// ============================================================================
// CHANGE SET
// ============================================================================

/// A reviewable set of proposed field mutations to one canonical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Canonical name of the target record
    pub record_id: String,
    pub diffs: Vec<FieldDiff>,
}

impl ChangeSet {
    /// Diff two versions of a record into a change-set.
    pub fn between(record_id: &str, before: &Value, after: &Value) -> Self {
        ChangeSet {
            record_id: record_id.to_string(),
            diffs: diff(before, after),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn touched_paths(&self) -> Vec<&str> {
        self.diffs.iter().map(|d| d.path.as_str()).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} field(s) [{}]",
            self.record_id,
            self.diffs.len(),
            self.touched_paths().join(", ")
        )
    }
}

// ============================================================================
// DIFF
// ============================================================================

/// Enumerate field-level differences between two structured values.
///
/// `diff(x, x) == []` for all x; the affected-path set is the same
/// whichever argument is labeled before.
pub fn diff(before: &Value, after: &Value) -> Vec<FieldDiff> {
    let mut out = Vec::new();
    diff_into("", before, after, &mut out);
    out
}

fn diff_into(prefix: &str, before: &Value, after: &Value, out: &mut Vec<FieldDiff>) {
    match (before, after) {
        // Recurse into matching plain objects; serde_json maps iterate in
        // key order, so the output ordering is deterministic
        (Value::Object(b), Value::Object(a)) => {
            for (key, b_val) in b {
                let path = join_path(prefix, key);
                match a.get(key) {
                    Some(a_val) => diff_into(&path, b_val, a_val, out),
                    None => out.push(FieldDiff {
                        path,
                        before: b_val.clone(),
                        after: Value::Null,
                    }),
                }
            }
            for (key, a_val) in a {
                if !b.contains_key(key) {
                    out.push(FieldDiff {
                        path: join_path(prefix, key),
                        before: Value::Null,
                        after: a_val.clone(),
                    });
                }
            }
        }

        // Arrays and primitives are atomic units
        (b, a) => {
            if b != a {
                out.push(FieldDiff {
                    path: prefix.to_string(),
                    before: b.clone(),
                    after: a.clone(),
                });
            }
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

// ============================================================================
// APPLY
// ============================================================================

/// Re-apply a diff: `apply(before, diff(before, after)) == after`.
///
/// An `after` of `Null` removes the key, mirroring how `diff` records
/// keys absent on one side.
pub fn apply(target: &mut Value, diffs: &[FieldDiff]) -> Result<()> {
    for field_diff in diffs {
        apply_one(target, field_diff)?;
    }
    Ok(())
}

fn apply_one(target: &mut Value, field_diff: &FieldDiff) -> Result<()> {
    let segments: Vec<&str> = field_diff.path.split('.').collect();
    let (leaf, parents) = segments
        .split_last()
        .ok_or_else(|| EngineError::Validation("empty diff path".to_string()))?;

    let mut cursor = target;
    for segment in parents {
        let obj = cursor.as_object_mut().ok_or_else(|| {
            EngineError::Validation(format!(
                "path '{}': '{}' is not an object",
                field_diff.path, segment
            ))
        })?;
        cursor = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    let obj = cursor.as_object_mut().ok_or_else(|| {
        EngineError::Validation(format!("path '{}': parent is not an object", field_diff.path))
    })?;

    if field_diff.after.is_null() {
        obj.remove(*leaf);
    } else {
        obj.insert(leaf.to_string(), field_diff.after.clone());
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
