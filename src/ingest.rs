// 📂 Observation Ingest - External records from CSV and extracted text
//
// Two source shapes:
// - Scraped CSV rows with named columns (name, year, amount, code)
// - Budget text lines produced by the PDF extraction stage:
//   "3540  Department of Forestry and Fire Protection  4,213,987"

use crate::error::{EngineError, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

// ============================================================================
// OBSERVATION
// ============================================================================

/// One external record to reconcile: a raw name plus whatever numeric
/// payload rode along with it.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Stable unit id ("<source file>:<line>"), used for checkpoint resume
    pub id: String,

    pub raw_name: String,
    pub source_file: String,

    /// Fiscal year the observation reports on ("2023-24")
    pub source_year: String,

    /// Extensible payload: amount, org code, anything else the source had
    pub payload: Value,
}

impl Observation {
    /// Reported dollar amount, when the source had one.
    pub fn amount(&self) -> Option<f64> {
        self.payload.get("amount").and_then(|v| v.as_f64())
    }

    /// Org code scraped alongside the name, when present.
    pub fn org_code(&self) -> Option<&str> {
        self.payload.get("orgCode").and_then(|v| v.as_str())
    }
}

// ============================================================================
// CSV SOURCE
// ============================================================================

/// Load observations from a scraped CSV file.
///
/// Recognized headers: `name` (or `department`), `year`, `amount`, `code`.
/// Rows without a name are skipped with a warning; a missing name column
/// is fatal.
pub fn load_csv(csv_path: &Path, default_year: &str) -> Result<Vec<Observation>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .map_err(|e| EngineError::Validation(format!("open {}: {}", csv_path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| EngineError::Validation(format!("{}: {}", csv_path.display(), e)))?
        .clone();

    let name_col = find_column(&headers, &["name", "department"]).ok_or_else(|| {
        EngineError::Validation(format!(
            "{}: no 'name' or 'department' column",
            csv_path.display()
        ))
    })?;
    let year_col = find_column(&headers, &["year", "fiscal_year"]);
    let amount_col = find_column(&headers, &["amount", "spending", "total"]);
    let code_col = find_column(&headers, &["code", "org_code"]);

    let source_file = csv_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| csv_path.display().to_string());

    let mut observations = Vec::new();

    for (index, row) in reader.records().enumerate() {
        let line = index + 2; // header is line 1
        let row = row
            .map_err(|e| EngineError::Validation(format!("{}:{}: {}", source_file, line, e)))?;

        let raw_name = row.get(name_col).unwrap_or("").trim().to_string();
        if raw_name.is_empty() {
            tracing::warn!(source = %source_file, line, "skipping row without a name");
            continue;
        }

        let mut payload = serde_json::Map::new();
        if let Some(col) = amount_col {
            if let Some(amount) = row.get(col).and_then(parse_amount) {
                payload.insert("amount".to_string(), json!(amount));
            }
        }
        if let Some(col) = code_col {
            if let Some(code) = row.get(col).map(str::trim).filter(|c| !c.is_empty()) {
                payload.insert("orgCode".to_string(), json!(code));
            }
        }

        let source_year = year_col
            .and_then(|col| row.get(col))
            .map(str::trim)
            .filter(|y| !y.is_empty())
            .unwrap_or(default_year)
            .to_string();

        observations.push(Observation {
            id: format!("{}:{}", source_file, line),
            raw_name,
            source_file: source_file.clone(),
            source_year,
            payload: Value::Object(payload),
        });
    }

    tracing::info!(source = %source_file, rows = observations.len(), "csv loaded");
    Ok(observations)
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

// ============================================================================
// BUDGET TEXT SOURCE
// ============================================================================

/// Load observations from an extracted budget text file. Each structured
/// line is `<4-digit code> <name> [<amount>]`; anything else (headers,
/// page furniture) is ignored.
pub fn load_budget_text(text_path: &Path, source_year: &str) -> Result<Vec<Observation>> {
    let raw = fs::read_to_string(text_path)?;
    let source_file = text_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| text_path.display().to_string());

    let observations = parse_budget_lines(&raw, &source_file, source_year);
    tracing::info!(source = %source_file, rows = observations.len(), "budget text loaded");
    Ok(observations)
}

/// Parse budget text lines into observations.
pub fn parse_budget_lines(text: &str, source_file: &str, source_year: &str) -> Vec<Observation> {
    let mut observations = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();

        let Some((code, rest)) = split_org_code(trimmed) else {
            continue;
        };

        // A trailing numeric field is the amount; the rest is the name
        let (name, amount) = split_trailing_amount(rest);
        if name.is_empty() {
            continue;
        }

        let mut payload = serde_json::Map::new();
        payload.insert("orgCode".to_string(), json!(code));
        if let Some(amount) = amount {
            payload.insert("amount".to_string(), json!(amount));
        }

        observations.push(Observation {
            id: format!("{}:{}", source_file, line_no),
            raw_name: name.to_string(),
            source_file: source_file.to_string(),
            source_year: source_year.to_string(),
            payload: Value::Object(payload),
        });
    }

    observations
}

/// Split a leading four-digit org code off a line.
fn split_org_code(line: &str) -> Option<(&str, &str)> {
    let code = line.split_whitespace().next()?;
    if code.len() == 4 && code.chars().all(|c| c.is_ascii_digit()) {
        let rest = line[code.len()..].trim_start();
        (!rest.is_empty()).then_some((code, rest))
    } else {
        None
    }
}

/// Split a trailing amount token ("4,213,987" or "4213987.50") off a line.
fn split_trailing_amount(rest: &str) -> (&str, Option<f64>) {
    let Some(last) = rest.split_whitespace().last() else {
        return (rest.trim(), None);
    };

    match parse_amount(last) {
        Some(amount) => {
            let name = rest[..rest.len() - last.len()].trim();
            (name, Some(amount))
        }
        None => (rest.trim(), None),
    }
}

/// Parse a dollar figure with optional thousands separators and sign.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_start_matches('$').replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    // Reject bare words; accept digits with optional decimal point/sign
    if !cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_csv_named_columns() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "department,year,amount,code").unwrap();
        writeln!(file, "CAL FIRE,2023-24,\"4213987\",3540").unwrap();
        writeln!(file, "Department of Motor Vehicles,2023-24,1452003,2740").unwrap();
        writeln!(file, ",2023-24,99,0000").unwrap();
        file.flush().unwrap();

        let observations = load_csv(file.path(), "2022-23").unwrap();
        assert_eq!(observations.len(), 2);

        let first = &observations[0];
        assert_eq!(first.raw_name, "CAL FIRE");
        assert_eq!(first.source_year, "2023-24");
        assert_eq!(first.amount(), Some(4_213_987.0));
        assert_eq!(first.org_code(), Some("3540"));
        assert!(first.id.ends_with(":2"));
    }

    #[test]
    fn test_load_csv_missing_name_column_is_fatal() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "year,amount").unwrap();
        writeln!(file, "2023-24,1").unwrap();
        file.flush().unwrap();

        assert!(load_csv(file.path(), "2023-24").is_err());
    }

    #[test]
    fn test_load_csv_default_year() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "name,amount").unwrap();
        writeln!(file, "CAL FIRE,10").unwrap();
        file.flush().unwrap();

        let observations = load_csv(file.path(), "2021-22").unwrap();
        assert_eq!(observations[0].source_year, "2021-22");
    }

    #[test]
    fn test_parse_budget_lines() {
        let text = "\
STATE OF CALIFORNIA BUDGET
3540  Department of Forestry and Fire Protection  4,213,987
2740  Department of Motor Vehicles
  3900  Air Resources Board  789,456
Page 12
";
        let observations = parse_budget_lines(text, "2023_budget.txt", "2023-24");
        assert_eq!(observations.len(), 3);

        assert_eq!(
            observations[0].raw_name,
            "Department of Forestry and Fire Protection"
        );
        assert_eq!(observations[0].org_code(), Some("3540"));
        assert_eq!(observations[0].amount(), Some(4_213_987.0));

        // No trailing amount: the whole rest of the line is the name
        assert_eq!(observations[1].raw_name, "Department of Motor Vehicles");
        assert_eq!(observations[1].amount(), None);

        // Indented lines still parse
        assert_eq!(observations[2].raw_name, "Air Resources Board");
    }

    #[test]
    fn test_parse_budget_lines_ignores_furniture() {
        let text = "TOTAL EXPENDITURES\n\n12 not-a-code line\n123 too short\n12345 too long\n";
        assert!(parse_budget_lines(text, "f.txt", "2023-24").is_empty());
    }

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("4,213,987"), Some(4_213_987.0));
        assert_eq!(parse_amount("$1,000.50"), Some(1000.5));
        assert_eq!(parse_amount("-250"), Some(-250.0));
        assert_eq!(parse_amount("Protection"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }
}
