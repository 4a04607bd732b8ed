// 🎯 Match Resolver - Classify an external name against the registry
//
// Priority tiers:
//   1. Case-insensitive exact match on name / canonical name / alias
//   2. Best fuzzy score over variation cross-products
//   3. Ambiguity is surfaced, never auto-resolved
//
// Deterministic for a fixed registry snapshot and threshold.

use crate::normalize::{default_exclusion_rules, ExclusionRule, VariationGenerator};
use crate::registry::{DepartmentRecord, Registry};
use crate::scoring::SimilarityScorer;
use serde::{Deserialize, Serialize};

// ============================================================================
// MATCH TIER
// ============================================================================

/// Match-strength classification explaining why a match was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTier {
    /// Exact on the display name
    Exact,

    /// Exact on the canonical name
    CanonicalName,

    /// Exact on a registered alias
    Alias,

    /// Accepted via similarity scoring
    Fuzzy,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::CanonicalName => "canonical-name",
            MatchTier::Alias => "alias",
            MatchTier::Fuzzy => "fuzzy",
        }
    }
}

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Canonical name of the matched record
    pub canonical_name: String,
    pub score: f64,
    pub tier: MatchTier,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MatchResult {
    Matched(MatchCandidate),
    Ambiguous {
        raw_name: String,
        candidates: Vec<MatchCandidate>,
    },
    Unmatched {
        raw_name: String,
    },
}

impl MatchResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }

    pub fn candidate(&self) -> Option<&MatchCandidate> {
        match self {
            MatchResult::Matched(c) => Some(c),
            _ => None,
        }
    }
}

// ============================================================================
// MATCHER CONFIG
// ============================================================================

/// Tunables for resolution. The thresholds are empirically tuned defaults
/// with no derivation behind them; jobs override per registry.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Minimum fuzzy score to accept a match (default: 0.80)
    pub acceptance_threshold: f64,

    /// Minimum edit score to flag registry self-duplicates (default: 0.80)
    pub dedup_threshold: f64,

    /// Marker-token pairs for disjoint institution classes
    pub exclusions: Vec<ExclusionRule>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            acceptance_threshold: 0.80,
            dedup_threshold: 0.80,
            exclusions: default_exclusion_rules(),
        }
    }
}

// ============================================================================
// MATCH RESOLVER
// ============================================================================

pub struct MatchResolver {
    pub config: MatcherConfig,
    variations: VariationGenerator,
    scorer: SimilarityScorer,
}

impl MatchResolver {
    pub fn new() -> Self {
        Self::with_config(MatcherConfig::default())
    }

    pub fn with_config(config: MatcherConfig) -> Self {
        MatchResolver {
            config,
            variations: VariationGenerator::new(),
            scorer: SimilarityScorer::new(),
        }
    }

    /// Resolve an external raw name against the registry.
    pub fn resolve(&self, raw_name: &str, registry: &Registry) -> MatchResult {
        let raw = raw_name.trim();
        if raw.is_empty() {
            return MatchResult::Unmatched {
                raw_name: raw_name.to_string(),
            };
        }

        // Tier 1: exact wins over any fuzzy candidate
        if let Some(candidate) = self.exact_lookup(raw, registry) {
            tracing::info!(
                raw = raw,
                matched = %candidate.canonical_name,
                tier = candidate.tier.as_str(),
                score = candidate.score,
                "exact match"
            );
            return MatchResult::Matched(candidate);
        }

        // Tier 2: best fuzzy score per candidate record
        let raw_variants = self.variations.variations(raw);
        let mut over_threshold: Vec<MatchCandidate> = Vec::new();

        for record in &registry.records {
            let (score, reason) = self.best_fuzzy_score(raw, &raw_variants, record);
            tracing::debug!(
                raw = raw,
                candidate = %record.canonical_name,
                score = score,
                reason = %reason,
                "fuzzy score"
            );
            if score >= self.config.acceptance_threshold {
                over_threshold.push(MatchCandidate {
                    canonical_name: record.canonical_name.clone(),
                    score,
                    tier: MatchTier::Fuzzy,
                    reason,
                });
            }
        }

        // Highest first; canonical name breaks exact ties deterministically
        over_threshold.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });

        match over_threshold.len() {
            0 => {
                tracing::info!(raw = raw, threshold = self.config.acceptance_threshold, "unmatched");
                MatchResult::Unmatched {
                    raw_name: raw_name.to_string(),
                }
            }
            1 => {
                let candidate = over_threshold.remove(0);
                tracing::info!(
                    raw = raw,
                    matched = %candidate.canonical_name,
                    score = candidate.score,
                    reason = %candidate.reason,
                    "fuzzy match"
                );
                MatchResult::Matched(candidate)
            }
            n => {
                tracing::warn!(
                    raw = raw,
                    candidates = n,
                    top = %over_threshold[0].canonical_name,
                    "ambiguous match, not auto-picking"
                );
                MatchResult::Ambiguous {
                    raw_name: raw_name.to_string(),
                    candidates: over_threshold,
                }
            }
        }
    }

    /// Case-insensitive exact match on name, canonical name, or alias.
    fn exact_lookup(&self, raw: &str, registry: &Registry) -> Option<MatchCandidate> {
        for record in &registry.records {
            let tier = if raw.eq_ignore_ascii_case(&record.name) {
                MatchTier::Exact
            } else if raw.eq_ignore_ascii_case(&record.canonical_name) {
                MatchTier::CanonicalName
            } else if record.aliases.iter().any(|a| raw.eq_ignore_ascii_case(a)) {
                MatchTier::Alias
            } else {
                continue;
            };

            return Some(MatchCandidate {
                canonical_name: record.canonical_name.clone(),
                score: 1.0,
                tier,
                reason: format!("case-insensitive {} match", tier.as_str()),
            });
        }
        None
    }

    /// Best score over variations(raw) × variations(candidate.name).
    /// Exclusion rules force a conflicting pair to 0 before any scoring.
    fn best_fuzzy_score(
        &self,
        raw: &str,
        raw_variants: &[String],
        record: &DepartmentRecord,
    ) -> (f64, String) {
        for rule in &self.config.exclusions {
            if rule.conflicts(raw, &record.name) {
                return (0.0, "excluded: disjoint institution classes".to_string());
            }
        }

        let candidate_variants = self.variations.variations(&record.name);
        let mut best = 0.0_f64;
        let mut best_pair = (String::new(), String::new());

        for rv in raw_variants {
            for cv in &candidate_variants {
                let score = self.scorer.score(rv, cv);
                if score > best {
                    best = score;
                    best_pair = (rv.clone(), cv.clone());
                    if best >= 1.0 {
                        return (best, format!("'{}' == '{}'", best_pair.0, best_pair.1));
                    }
                }
            }
        }

        let reason = if best > 0.0 {
            format!("'{}' ~ '{}' = {:.2}", best_pair.0, best_pair.1, best)
        } else {
            "no token overlap".to_string()
        };
        (best, reason)
    }

    // ========================================================================
    // SELF-DEDUPLICATION
    // ========================================================================

    /// Match one record's name against the whole registry using the
    /// edit-distance score. The record itself always clears the threshold,
    /// so any near-duplicate makes the result Ambiguous - never auto-pick.
    pub fn dedup_record(&self, record: &DepartmentRecord, registry: &Registry) -> MatchResult {
        let mut candidates: Vec<MatchCandidate> = Vec::new();

        for other in &registry.records {
            if self
                .config
                .exclusions
                .iter()
                .any(|rule| rule.conflicts(&record.name, &other.name))
            {
                continue;
            }

            let score = if other.canonical_name.eq_ignore_ascii_case(&record.canonical_name) {
                1.0
            } else {
                self.scorer.edit_score(&record.name, &other.name)
            };

            if score >= self.config.dedup_threshold {
                candidates.push(MatchCandidate {
                    canonical_name: other.canonical_name.clone(),
                    score,
                    tier: MatchTier::Fuzzy,
                    reason: format!("edit score {:.2}", score),
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });

        if candidates.len() > 1 {
            tracing::warn!(
                record = %record.canonical_name,
                near_duplicates = candidates.len() - 1,
                "registry self-dedup flagged ambiguity"
            );
            MatchResult::Ambiguous {
                raw_name: record.name.clone(),
                candidates,
            }
        } else {
            MatchResult::Matched(MatchCandidate {
                canonical_name: record.canonical_name.clone(),
                score: 1.0,
                tier: MatchTier::CanonicalName,
                reason: "no near-duplicates".to_string(),
            })
        }
    }

    /// Scan the whole registry for near-duplicate records.
    pub fn find_registry_duplicates(&self, registry: &Registry) -> Vec<MatchResult> {
        registry
            .records
            .iter()
            .map(|record| self.dedup_record(record, registry))
            .filter(|result| !result.is_matched())
            .collect()
    }
}

impl Default for MatchResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DepartmentRecord;

    fn test_registry() -> Registry {
        let mut cal_fire =
            DepartmentRecord::new("Department of Forestry and Fire Protection", "active");
        cal_fire.add_alias("CAL FIRE");

        let dmv = DepartmentRecord::new("Department of Motor Vehicles", "active");
        let water = DepartmentRecord::new("Department of Water Resources", "active");

        Registry::from_records(vec![cal_fire, dmv, water])
    }

    #[test]
    fn test_exact_alias_match() {
        let resolver = MatchResolver::new();
        let registry = test_registry();

        let result = resolver.resolve("CAL FIRE", &registry);
        let candidate = result.candidate().expect("should match");

        assert_eq!(
            candidate.canonical_name,
            "Department of Forestry and Fire Protection"
        );
        assert_eq!(candidate.tier, MatchTier::Alias);
        assert_eq!(candidate.score, 1.0);
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let resolver = MatchResolver::new();
        let registry = test_registry();

        let result = resolver.resolve("cal fire", &registry);
        assert!(result.is_matched());

        let result = resolver.resolve("DEPARTMENT OF MOTOR VEHICLES", &registry);
        let candidate = result.candidate().expect("should match");
        assert_eq!(candidate.tier, MatchTier::Exact);
        assert_eq!(candidate.score, 1.0);
    }

    #[test]
    fn test_fuzzy_match_state_prefix() {
        let resolver = MatchResolver::new();
        let registry = test_registry();

        let result =
            resolver.resolve("California Department of Forestry & Fire Protection", &registry);
        let candidate = result.candidate().expect("should match");

        assert_eq!(
            candidate.canonical_name,
            "Department of Forestry and Fire Protection"
        );
        assert_eq!(candidate.tier, MatchTier::Fuzzy);
        assert!(candidate.score >= 0.8);
    }

    #[test]
    fn test_unmatched_name() {
        let resolver = MatchResolver::new();
        let registry = test_registry();

        let result = resolver.resolve("Department of Education", &registry);
        assert!(matches!(result, MatchResult::Unmatched { .. }));
    }

    #[test]
    fn test_empty_name_unmatched() {
        let resolver = MatchResolver::new();
        let registry = test_registry();

        assert!(matches!(
            resolver.resolve("", &registry),
            MatchResult::Unmatched { .. }
        ));
        assert!(matches!(
            resolver.resolve("   ", &registry),
            MatchResult::Unmatched { .. }
        ));
    }

    #[test]
    fn test_exact_wins_over_fuzzy() {
        // A record whose alias is textually close to another record's name:
        // the alias's exact match must win even though fuzzy scoring against
        // the other record would also clear the threshold.
        let mut first = DepartmentRecord::new("Department of Water Resources", "active");
        first.add_alias("Water Resources Board");
        let second = DepartmentRecord::new("Water Resources Control Board", "active");
        let registry = Registry::from_records(vec![first, second]);

        let resolver = MatchResolver::new();
        let result = resolver.resolve("Water Resources Board", &registry);
        let candidate = result.candidate().expect("should match");

        assert_eq!(candidate.tier, MatchTier::Alias);
        assert_eq!(candidate.canonical_name, "Department of Water Resources");
        assert_eq!(candidate.score, 1.0);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let resolver = MatchResolver::new();
        let registry = test_registry();
        let raw = "Calif Dept of Forestry and Fire Protection";

        let first = format!("{:?}", resolver.resolve(raw, &registry));
        for _ in 0..5 {
            assert_eq!(format!("{:?}", resolver.resolve(raw, &registry)), first);
        }
    }

    #[test]
    fn test_exclusion_forces_zero() {
        let uc = DepartmentRecord::new("University of California, Davis", "active");
        let registry = Registry::from_records(vec![uc]);
        let resolver = MatchResolver::new();

        // High textual overlap, but the marker pairs are disjoint classes
        let result = resolver.resolve("California State University, Davis", &registry);
        assert!(matches!(result, MatchResult::Unmatched { .. }));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let registry = test_registry();

        let strict = MatchResolver::with_config(MatcherConfig {
            acceptance_threshold: 0.99,
            ..MatcherConfig::default()
        });
        let result = strict.resolve("Forestry and Fire Protection Dept", &registry);
        assert!(!result.is_matched() || result.candidate().map(|c| c.score) >= Some(0.99));
    }

    #[test]
    fn test_self_dedup_two_similar_records_ambiguous() {
        let a = DepartmentRecord::new("Department of Water Resources", "active");
        let b = DepartmentRecord::new("Department of Water Resource", "active");
        let registry = Registry::from_records(vec![a.clone(), b]);

        let resolver = MatchResolver::new();
        let result = resolver.dedup_record(&a, &registry);

        match result {
            MatchResult::Ambiguous { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected Ambiguous, got {:?}", other),
        }

        let findings = resolver.find_registry_duplicates(&registry);
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_self_dedup_clean_registry() {
        let registry = test_registry();
        let resolver = MatchResolver::new();

        // DMV, CAL FIRE, and Water Resources are not spelling variants
        assert!(resolver.find_registry_duplicates(&registry).is_empty());
    }
}
