// 🔤 Name Normalizer - Canonical token form + bounded variations
//
// Problem solved:
// - "CA Dept. of Forestry & Fire Protection", "California Department of
//   Forestry and Fire Protection", "Forestry and Fire Protection" → all
//   reduce to the same comparable token string
// - Scraped names carry inconsistent punctuation, abbreviations, and
//   structural filler ("Department of", "State", "Office")

use serde::{Deserialize, Serialize};

// ============================================================================
// NORMALIZER
// ============================================================================

/// Structural filler removed as a leading phrase before token filtering.
const STOPWORD_PHRASES: &[&str] = &["department of"];

/// Structural filler removed token-by-token.
const STOPWORD_TOKENS: &[&str] = &["the", "of", "office", "board", "state", "california"];

/// Abbreviations standardized before stopword removal.
const TOKEN_SYNONYMS: &[(&str, &str)] = &[
    ("dept", "department"),
    ("depts", "department"),
    ("calif", "california"),
    ("ca", "california"),
    ("comm", "commission"),
    ("svcs", "services"),
    ("svc", "services"),
    ("hwy", "highway"),
];

/// Normalize a raw name into a comparable token string.
///
/// Lowercase, "&" → "and", punctuation stripped, whitespace collapsed,
/// abbreviations expanded, structural stopwords removed.
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
/// Empty input → empty string, never an error.
///
/// Example: "CA Dept. of Forestry & Fire Protection" → "forestry and fire protection"
pub fn normalize(raw: &str) -> String {
    let tokens = standardized_tokens(raw);
    let mut tokens: Vec<&str> = tokens.iter().map(|t| t.as_str()).collect();

    // Phrase removal first: "department of X" keeps X, while a trailing
    // "department" token ("Forestry Department") survives token filtering.
    for phrase in STOPWORD_PHRASES {
        let phrase_tokens: Vec<&str> = phrase.split_whitespace().collect();
        tokens = remove_phrase(&tokens, &phrase_tokens);
    }

    tokens
        .into_iter()
        .filter(|t| !STOPWORD_TOKENS.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, "&" → "and", punctuation → space, abbreviations expanded.
/// Keeps stopwords; used as the surface form for variation generation.
pub fn clean(raw: &str) -> String {
    standardized_tokens(raw).join(" ")
}

fn standardized_tokens(raw: &str) -> Vec<String> {
    let lowered = raw.to_lowercase().replace('&', " and ");

    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| {
            for (abbrev, full) in TOKEN_SYNONYMS {
                if t == *abbrev {
                    return (*full).to_string();
                }
            }
            t.to_string()
        })
        .collect()
}

/// Remove every occurrence of a token phrase from a token list.
fn remove_phrase<'a>(tokens: &[&'a str], phrase: &[&str]) -> Vec<&'a str> {
    if phrase.is_empty() || tokens.len() < phrase.len() {
        return tokens.to_vec();
    }

    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if i + phrase.len() <= tokens.len() && tokens[i..i + phrase.len()] == phrase[..] {
            i += phrase.len();
        } else {
            out.push(tokens[i]);
            i += 1;
        }
    }
    out
}

/// Check whether a token phrase occurs contiguously in a token list.
fn contains_phrase(tokens: &[&str], phrase: &[&str]) -> bool {
    !phrase.is_empty()
        && tokens.len() >= phrase.len()
        && (0..=tokens.len() - phrase.len()).any(|i| tokens[i..i + phrase.len()] == phrase[..])
}

// ============================================================================
// EXCLUSION RULES
// ============================================================================

/// A pair of disjoint institution classes identified by marker tokens.
///
/// If one name carries a marker from `left` and the other a marker from
/// `right`, the pair is forced to score 0 regardless of textual overlap.
/// "University of California Davis" must never match "California State
/// University Davis", however similar the strings look.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub left: Vec<String>,
    pub right: Vec<String>,
}

impl ExclusionRule {
    pub fn new(left: &[&str], right: &[&str]) -> Self {
        ExclusionRule {
            left: left.iter().map(|s| s.to_string()).collect(),
            right: right.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// True when the two names carry markers from opposite sides.
    pub fn conflicts(&self, a: &str, b: &str) -> bool {
        let a_clean = clean(a);
        let b_clean = clean(b);
        let a_tokens: Vec<&str> = a_clean.split_whitespace().collect();
        let b_tokens: Vec<&str> = b_clean.split_whitespace().collect();

        let has = |tokens: &[&str], markers: &[String]| {
            markers.iter().any(|m| {
                let phrase: Vec<&str> = m.split_whitespace().collect();
                contains_phrase(tokens, &phrase)
            })
        };

        (has(&a_tokens, &self.left) && has(&b_tokens, &self.right))
            || (has(&a_tokens, &self.right) && has(&b_tokens, &self.left))
    }
}

/// Default marker pairs for the California institution systems that
/// collide most often in scraped data.
pub fn default_exclusion_rules() -> Vec<ExclusionRule> {
    vec![
        ExclusionRule::new(
            &["university of california", "uc"],
            &["california state university", "state university", "csu"],
        ),
        ExclusionRule::new(
            &["community college", "community colleges"],
            &["university"],
        ),
    ]
}

// ============================================================================
// VARIATION GENERATOR
// ============================================================================

/// Generates a bounded, deterministic set of alternate surface forms for
/// a name. All forms are token strings ready for the similarity scorer.
pub struct VariationGenerator {
    /// Upper bound on generated forms (default: 30)
    pub max_variations: usize,
}

/// Prefixes stripped from the cleaned surface form.
const STRIP_PREFIXES: &[&str] = &[
    "california",
    "state of california",
    "office of",
    "board of",
    "department of",
    "division of",
];

/// Suffixes stripped from the cleaned surface form.
const STRIP_SUFFIXES: &[&str] = &["department", "office", "board", "program", "division"];

/// Interchangeable domain phrases, applied in both directions.
const SYNONYM_PAIRS: &[(&str, &str)] = &[
    ("health care", "healthcare"),
    ("veterans affairs", "veterans"),
    ("corrections and rehabilitation", "corrections"),
    ("motor vehicles", "dmv"),
];

impl VariationGenerator {
    pub fn new() -> Self {
        VariationGenerator { max_variations: 30 }
    }

    /// Produce alternate forms of a name, most canonical first.
    ///
    /// Deterministic: same input, same output, same order.
    pub fn variations(&self, name: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();

        let base = normalize(name);
        push_unique(&mut out, base.clone());

        let cleaned = clean(name);
        push_unique(&mut out, cleaned.clone());

        // Prefix/suffix strips on the surface form
        for prefix in STRIP_PREFIXES {
            if let Some(rest) = strip_prefix_phrase(&cleaned, prefix) {
                push_unique(&mut out, rest);
            }
        }
        for suffix in STRIP_SUFFIXES {
            if let Some(rest) = strip_suffix_phrase(&cleaned, suffix) {
                push_unique(&mut out, rest);
            }
        }

        // "&"/"and" interchange: clean() canonicalizes "&" to "and", so the
        // alternates are the "&" surface form and the conjunction-free form
        let seed: Vec<String> = out.clone();
        for form in &seed {
            if form.contains(" and ") {
                push_unique(&mut out, form.replace(" and ", " & "));
                push_unique(&mut out, form.replace(" and ", " "));
            }
        }

        // Domain synonym pairs, both directions
        let seed: Vec<String> = out.clone();
        for form in &seed {
            for (a, b) in SYNONYM_PAIRS {
                if form.contains(a) {
                    push_unique(&mut out, form.replace(a, b));
                }
                if form.contains(b) {
                    push_unique(&mut out, form.replace(b, a));
                }
            }
        }

        // Word-order rotations of the normalized base
        let tokens: Vec<&str> = base.split_whitespace().collect();
        if tokens.len() > 1 {
            for shift in 1..tokens.len().min(4) {
                let mut rotated = tokens[shift..].to_vec();
                rotated.extend_from_slice(&tokens[..shift]);
                push_unique(&mut out, rotated.join(" "));
            }
        }

        out.retain(|v| !v.is_empty());
        out.truncate(self.max_variations);
        out
    }
}

impl Default for VariationGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn push_unique(out: &mut Vec<String>, form: String) {
    if !out.contains(&form) {
        out.push(form);
    }
}

fn strip_prefix_phrase(form: &str, prefix: &str) -> Option<String> {
    let rest = form.strip_prefix(prefix)?;
    let rest = rest.trim_start();
    if rest.is_empty() || rest.len() == form.len() {
        None
    } else {
        Some(rest.to_string())
    }
}

fn strip_suffix_phrase(form: &str, suffix: &str) -> Option<String> {
    let rest = form.strip_suffix(suffix)?;
    let rest = rest.trim_end();
    if rest.is_empty() || rest.len() == form.len() {
        None
    } else {
        Some(rest.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
