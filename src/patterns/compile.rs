//! One-time pattern compilation and tier assignment
//!
//! Any pattern without a precompiled matcher is excluded from hot-path
//! tiers by construction: only successfully compiled patterns exist.

use crate::error::GateError;
use crate::models::{PatternId, Severity, Tier};
use crate::patterns::catalog::{PatternSpec, ULTRA_PINNED};
use crate::patterns::anchor_covered_by_keywords;
use regex::{Regex, RegexBuilder};

/// A pinned pattern longer than this falls back to CRITICAL_FAST.
const MAX_ULTRA_SOURCE_LEN: usize = 64;

/// Compile-time cap on a single pattern's automaton size.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// An immutable, hot-path-ready pattern.
#[derive(Debug)]
pub struct CompiledPattern {
    pub id: PatternId,
    pub source: String,
    pub regex: Regex,
    pub message: String,
    pub severity: Severity,
    pub category: crate::models::Category,
    pub tier: Tier,
    /// Index into the weight table. `usize::MAX` when the slot space was
    /// exhausted; such patterns run at the default weight forever.
    pub weight_slot: usize,
    /// Whether the keyword-windowed scan view is guaranteed to preserve
    /// every possible match of this pattern.
    pub windowed: bool,
    /// Static ordering heuristic; higher scans earlier within a tier.
    pub selectivity: u32,
    pub priority: f64,
}

impl CompiledPattern {
    #[inline]
    pub fn has_weight_slot(&self) -> bool {
        self.weight_slot != usize::MAX
    }
}

/// Compile a spec into a hot-path pattern. Invalid regexes yield
/// `PatternCompileError` and are skipped by the store.
pub fn compile_spec(spec: &PatternSpec, weight_slot: usize) -> Result<CompiledPattern, GateError> {
    let regex = RegexBuilder::new(&spec.source)
        .case_insensitive(true)
        .multi_line(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| GateError::PatternCompile {
            id: spec.id.clone(),
            source: Box::new(e),
        })?;

    let windowed = !spec.anchors.is_empty()
        && spec.anchors.iter().all(|a| anchor_covered_by_keywords(a));

    Ok(CompiledPattern {
        id: PatternId::new(&spec.id),
        source: spec.source.clone(),
        regex,
        message: spec.message.clone(),
        severity: spec.severity,
        category: spec.category,
        tier: assign_tier(spec),
        weight_slot,
        windowed,
        selectivity: selectivity_score(&spec.source),
        priority: spec.priority,
    })
}

/// Tier assignment policy: the pinned most-dangerous set goes to
/// ULTRA_CRITICAL (unless its matcher is too long), remaining CRITICAL
/// patterns to CRITICAL_FAST, everything else to HIGH_NORMAL.
pub fn assign_tier(spec: &PatternSpec) -> Tier {
    let pinned = ULTRA_PINNED.contains(&spec.id.as_str());
    match spec.severity {
        Severity::Critical if pinned && spec.source.len() <= MAX_ULTRA_SOURCE_LEN => {
            Tier::UltraCritical
        }
        Severity::Critical => Tier::CriticalFast,
        Severity::High | Severity::Info => Tier::HighNormal,
    }
}

/// Static selectivity heuristic from the regex source: anchored patterns
/// and long literal prefixes front-load the sweep.
fn selectivity_score(source: &str) -> u32 {
    let anchored = source.starts_with('^');
    let body = source.strip_prefix('^').unwrap_or(source);

    let mut prefix_len = 0u32;
    for c in body.chars() {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            prefix_len += 1;
        } else {
            break;
        }
    }

    let literal_total = body
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .count() as u32;

    prefix_len * 8 + u32::from(anchored) * 16 + literal_total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use crate::patterns::catalog::builtin_catalog;

    fn spec(id: &str, source: &str, severity: Severity) -> PatternSpec {
        PatternSpec::new(id, source, "msg", severity, Category::General)
    }

    #[test]
    fn test_compile_rejects_invalid_regex() {
        let err = compile_spec(&spec("x", r"([unclosed", Severity::High), 0);
        assert!(matches!(err, Err(GateError::PatternCompile { .. })));
    }

    #[test]
    fn test_tier_assignment() {
        let specs = builtin_catalog();
        for s in &specs {
            let tier = assign_tier(s);
            match s.severity {
                Severity::Critical => {
                    if ULTRA_PINNED.contains(&s.id.as_str()) {
                        assert_eq!(tier, Tier::UltraCritical, "{}", s.id);
                    } else {
                        assert_eq!(tier, Tier::CriticalFast, "{}", s.id);
                    }
                }
                _ => assert_eq!(tier, Tier::HighNormal, "{}", s.id),
            }
        }
    }

    #[test]
    fn test_oversized_pinned_pattern_demoted() {
        let long_source = format!("rm{}", "x?".repeat(60));
        let mut s = spec("critical.commands.rm-rf-root", &long_source, Severity::Critical);
        s.anchors = vec!["rm".into()];
        assert_eq!(assign_tier(&s), Tier::CriticalFast);
    }

    #[test]
    fn test_selectivity_prefers_literal_prefix() {
        assert!(selectivity_score("AKIA[0-9A-Z]{16}") > selectivity_score(r"\b(temp|hack)\b"));
        assert!(selectivity_score("^sudo rm") > selectivity_score("sudo rm"));
    }

    #[test]
    fn test_windowed_eligibility() {
        let mut s = spec("a", r"AKIA[0-9A-Z]{16}", Severity::Critical);
        s.anchors = vec!["akia".into()];
        assert!(compile_spec(&s, 0).unwrap().windowed);

        // Anchor not in the keyword set: must scan full input.
        let mut s = spec("b", r"xox[baprs]-", Severity::Critical);
        s.anchors = vec!["xox".into()];
        assert!(!compile_spec(&s, 0).unwrap().windowed);

        // No anchors at all: full input.
        let s = spec("c", r"とりあえず|暫定対応", Severity::High);
        assert!(!compile_spec(&s, 0).unwrap().windowed);
    }
}
