//! Tiered scanner
//!
//! Single hot-path orchestrator: tiers in ascending budget order, weighted
//! confidence against per-severity thresholds, short-circuit on the first
//! blocking or warning match. Informational hits never short-circuit; they
//! are deferred so a later HIGH or CRITICAL match supersedes them. Matcher
//! panics are caught, counted, and treated as no-match; the scan continues.
//! Nothing here blocks, allocates beyond the derived scan view, or touches
//! a lock.

use crate::config::EngineConfig;
use crate::engine::clock::GateClock;
use crate::engine::scan_view::ScanView;
use crate::engine::ultrafast::{TierSweep, UltraFastMatcher};
use crate::learning::WeightTable;
use crate::models::{Severity, Tier, Verdict};
use crate::patterns::{CompiledPattern, PatternStore};
use crate::perf::{EngineState, MetricsHub};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A pattern hit with its weighted confidence.
#[derive(Debug, Clone)]
pub struct MatchedPattern {
    pub pattern: Arc<CompiledPattern>,
    pub confidence: f64,
}

/// Everything the engine needs to finish a call: verdict, the match that
/// produced it (for learning), and observation data.
#[derive(Debug)]
pub struct ScanOutcome {
    pub verdict: Verdict,
    pub matched: Option<MatchedPattern>,
    pub tier_reached: Option<Tier>,
    pub elapsed_us: u64,
    pub matcher_errors: u32,
}

enum TierScan {
    Emit(MatchedPattern),
    Exhausted,
    TotalExpired,
}

pub struct Scanner {
    cfg: Arc<EngineConfig>,
    store: Arc<PatternStore>,
    weights: Arc<WeightTable>,
    state: Arc<EngineState>,
    metrics: Arc<MetricsHub>,
    clock: GateClock,
    ultra: UltraFastMatcher,
}

impl Scanner {
    pub fn new(
        cfg: Arc<EngineConfig>,
        store: Arc<PatternStore>,
        weights: Arc<WeightTable>,
        state: Arc<EngineState>,
        metrics: Arc<MetricsHub>,
    ) -> Self {
        let clock = GateClock::new();
        let ultra = UltraFastMatcher::new(clock.clone());
        Self {
            cfg,
            store,
            weights,
            state,
            metrics,
            clock,
            ultra,
        }
    }

    pub fn scan(&self, content: &str) -> ScanOutcome {
        let start = self.clock.raw();
        let stability = self.state.stability_mode();
        let total_budget_us = if stability {
            self.cfg.stability.total_budget_us
        } else {
            self.cfg.total_budget_us
        };
        let ultra_only = self.state.ultra_only.load(Ordering::Relaxed);

        let set = self.store.current();
        let view = ScanView::build(content, self.cfg.scan_view_threshold);

        let mut best_below: Option<MatchedPattern> = None;
        let mut tier_reached: Option<Tier> = None;
        let mut matcher_errors = 0u32;

        for tier in Tier::ALL {
            if ultra_only && tier != Tier::UltraCritical {
                break;
            }
            if self.clock.elapsed_us(start) >= total_budget_us {
                return self.expired(start, best_below, tier_reached, matcher_errors);
            }
            tier_reached = Some(tier);
            let tier_budget_us = self.tier_budget(tier, stability);
            let tier_start = self.clock.raw();

            // The ultra tier goes through the pre-ordered in-memory sweep;
            // a sub-threshold hit resumes the generic walk right after it.
            let mut from = 0usize;
            if tier == Tier::UltraCritical {
                match self.ultra.scan(&set, &view, tier_start, tier_budget_us) {
                    TierSweep::Hit(index, pattern) => {
                        let confidence = self.confidence(pattern);
                        if confidence >= pattern.severity.threshold() {
                            return self.emit(start, pattern, confidence, tier_reached, matcher_errors);
                        }
                        track_best(&mut best_below, pattern, confidence);
                        from = index + 1;
                    }
                    TierSweep::NoMatch | TierSweep::BudgetExhausted => continue,
                }
            }

            match self.scan_tier(
                set.tier(tier),
                from,
                &view,
                start,
                total_budget_us,
                tier_start,
                tier_budget_us,
                &mut best_below,
                &mut matcher_errors,
            ) {
                TierScan::Emit(matched) => {
                    return self.emit(
                        start,
                        &matched.pattern,
                        matched.confidence,
                        tier_reached,
                        matcher_errors,
                    );
                }
                TierScan::Exhausted => continue,
                TierScan::TotalExpired => {
                    return self.expired(start, best_below, tier_reached, matcher_errors);
                }
            }
        }

        let elapsed_us = self.clock.elapsed_us(start);
        ScanOutcome {
            verdict: deferred_verdict(&best_below),
            matched: best_below,
            tier_reached,
            elapsed_us,
            matcher_errors,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_tier(
        &self,
        patterns: &[Arc<CompiledPattern>],
        from: usize,
        view: &ScanView<'_>,
        start: u64,
        total_budget_us: u64,
        tier_start: u64,
        tier_budget_us: u64,
        best_below: &mut Option<MatchedPattern>,
        matcher_errors: &mut u32,
    ) -> TierScan {
        for pattern in patterns.iter().skip(from) {
            if self.clock.elapsed_us(tier_start) > tier_budget_us {
                return TierScan::Exhausted;
            }
            if self.clock.elapsed_us(start) >= total_budget_us {
                return TierScan::TotalExpired;
            }

            let target = if pattern.windowed {
                view.windowed()
            } else {
                view.full()
            };
            let hit = match catch_unwind(AssertUnwindSafe(|| pattern.regex.is_match(target))) {
                Ok(hit) => hit,
                Err(_) => {
                    *matcher_errors += 1;
                    self.metrics.record_matcher_failure();
                    continue;
                }
            };
            if !hit {
                continue;
            }

            let confidence = self.confidence(pattern);
            if confidence >= pattern.severity.threshold() {
                // Informational matches are deferred, never emitted
                // mid-scan: a HIGH or CRITICAL hit later supersedes them.
                if pattern.severity == Severity::Info {
                    track_best(best_below, pattern, confidence);
                    continue;
                }
                return TierScan::Emit(MatchedPattern {
                    pattern: Arc::clone(pattern),
                    confidence,
                });
            }
            track_best(best_below, pattern, confidence);
        }
        TierScan::Exhausted
    }

    #[inline]
    fn confidence(&self, pattern: &CompiledPattern) -> f64 {
        pattern.severity.base_confidence() * self.weights.get(pattern.weight_slot)
    }

    #[inline]
    fn tier_budget(&self, tier: Tier, stability: bool) -> u64 {
        if stability {
            match tier {
                Tier::UltraCritical => self.cfg.stability.ultra_critical_us,
                Tier::CriticalFast => self.cfg.stability.critical_fast_us,
                Tier::HighNormal => self.cfg.stability.high_normal_us,
            }
        } else {
            self.cfg.tiers.for_tier(tier)
        }
    }

    fn emit(
        &self,
        start: u64,
        pattern: &Arc<CompiledPattern>,
        confidence: f64,
        tier_reached: Option<Tier>,
        matcher_errors: u32,
    ) -> ScanOutcome {
        let verdict = match pattern.severity {
            Severity::Critical => Verdict::Block {
                severity: Severity::Critical,
                message: pattern.message.clone(),
                pattern_id: pattern.id.clone(),
            },
            Severity::High => Verdict::Warn {
                severity: Severity::High,
                message: pattern.message.clone(),
                pattern_id: pattern.id.clone(),
            },
            Severity::Info => Verdict::Info {
                severity: Severity::Info,
                message: pattern.message.clone(),
                pattern_id: pattern.id.clone(),
            },
        };
        ScanOutcome {
            verdict,
            matched: Some(MatchedPattern {
                pattern: Arc::clone(pattern),
                confidence,
            }),
            tier_reached,
            elapsed_us: self.clock.elapsed_us(start),
            matcher_errors,
        }
    }

    /// Total budget expired: best verdict so far, or `Timeout`.
    fn expired(
        &self,
        start: u64,
        best_below: Option<MatchedPattern>,
        tier_reached: Option<Tier>,
        matcher_errors: u32,
    ) -> ScanOutcome {
        let verdict = match &best_below {
            Some(_) => deferred_verdict(&best_below),
            None => Verdict::Timeout,
        };
        ScanOutcome {
            verdict,
            matched: best_below,
            tier_reached,
            elapsed_us: self.clock.elapsed_us(start),
            matcher_errors,
        }
    }
}

/// Keep the most severe (then most confident) sub-threshold match.
fn track_best(best: &mut Option<MatchedPattern>, pattern: &Arc<CompiledPattern>, confidence: f64) {
    let better = match best {
        None => true,
        Some(current) => match pattern.severity.cmp(&current.pattern.severity) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => confidence > current.confidence,
            std::cmp::Ordering::Greater => false,
        },
    };
    if better {
        *best = Some(MatchedPattern {
            pattern: Arc::clone(pattern),
            confidence,
        });
    }
}

/// Deferred matches (sub-threshold, or informational at any confidence)
/// surface as `Info` when they clear the INFO floor; anything weaker
/// passes silently.
fn deferred_verdict(best: &Option<MatchedPattern>) -> Verdict {
    match best {
        Some(m) if m.confidence >= Severity::Info.threshold() => Verdict::Info {
            severity: Severity::Info,
            message: m.pattern.message.clone(),
            pattern_id: m.pattern.id.clone(),
        },
        _ => Verdict::Pass,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{builtin_catalog, PatternSpec};
    use crate::models::Category;

    fn scanner_with(specs: Vec<PatternSpec>) -> (Scanner, Arc<WeightTable>) {
        let cfg = Arc::new(EngineConfig::default());
        let (store, _) = PatternStore::from_specs(&specs, 256);
        let weights = Arc::new(WeightTable::new(256));
        let scanner = Scanner::new(
            cfg,
            Arc::new(store),
            Arc::clone(&weights),
            Arc::new(EngineState::default()),
            Arc::new(MetricsHub::new(64, 10_000)),
        );
        (scanner, weights)
    }

    #[test]
    fn test_critical_blocks() {
        let (scanner, _) = scanner_with(builtin_catalog());
        let outcome = scanner.scan("sudo rm -rf /");
        assert!(outcome.verdict.blocks());
        assert_eq!(outcome.tier_reached, Some(Tier::UltraCritical));
    }

    #[test]
    fn test_high_warns() {
        let (scanner, _) = scanner_with(builtin_catalog());
        let outcome = scanner.scan("とりあえずこれで修正");
        assert!(matches!(outcome.verdict, Verdict::Warn { .. }));
        assert_eq!(outcome.verdict.status(), "passed_with_warnings");
    }

    #[test]
    fn test_info_passes_with_detail() {
        let (scanner, _) = scanner_with(builtin_catalog());
        let outcome = scanner.scan("console.log('debug')");
        match outcome.verdict {
            Verdict::Info { severity, .. } => assert_eq!(severity, Severity::Info),
            ref other => panic!("expected Info, got {other:?}"),
        }
        assert_eq!(outcome.verdict.status(), "passed");
    }

    #[test]
    fn test_clean_input_passes() {
        let (scanner, _) = scanner_with(builtin_catalog());
        let outcome = scanner.scan("const total = sum(items)");
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert!(outcome.matched.is_none());
    }

    #[test]
    fn test_critical_supersedes_high() {
        // Both a CRITICAL and a HIGH pattern match; the scan order must
        // produce the CRITICAL verdict.
        let (scanner, _) = scanner_with(builtin_catalog());
        let outcome = scanner.scan("とりあえず sudo rm -rf / で修正");
        assert!(outcome.verdict.blocks());
    }

    #[test]
    fn test_high_supersedes_info() {
        let (scanner, _) = scanner_with(builtin_catalog());
        let outcome = scanner.scan("console.log('x'); // とりあえず仮対応");
        assert!(matches!(outcome.verdict, Verdict::Warn { .. }));
    }

    #[test]
    fn test_info_deferred_until_tier_end() {
        // The info pattern out-sorts the high one on selectivity; the
        // high match must still win the verdict.
        let mut specs = builtin_catalog();
        specs.push(PatternSpec::new(
            "info.custom.debug-marker",
            r"debugmarkerxyzzy",
            "debug marker",
            Severity::Info,
            Category::Style,
        ));
        specs.push(PatternSpec::new(
            "high.custom.rushed",
            r"\b(rushed|sloppy)\b",
            "rushed change marker",
            Severity::High,
            Category::Maintainability,
        ));
        let (scanner, _) = scanner_with(specs);

        let set = scanner.store.snapshot();
        let info = set.find("info.custom.debug-marker").unwrap();
        let high = set.find("high.custom.rushed").unwrap();
        assert!(info.selectivity > high.selectivity);

        let outcome = scanner.scan("debugmarkerxyzzy and a sloppy patch");
        assert!(matches!(outcome.verdict, Verdict::Warn { .. }));

        // Alone, the info pattern still surfaces.
        let outcome = scanner.scan("debugmarkerxyzzy only");
        assert!(matches!(outcome.verdict, Verdict::Info { .. }));
    }

    #[test]
    fn test_downweighted_critical_degrades_to_info() {
        let (scanner, weights) = scanner_with(builtin_catalog());
        let set = scanner.store.snapshot();
        let pattern = set.find("critical.secrets.aws-access-key").unwrap();
        // Below the 0.8 CRITICAL threshold but above the 0.4 INFO floor.
        weights.apply_update(pattern.weight_slot, 0.5, 1);

        let outcome = scanner.scan("AKIA1234567890ABCDEF");
        assert!(matches!(outcome.verdict, Verdict::Info { .. }));
        assert!(!outcome.verdict.blocks());
    }

    #[test]
    fn test_downweighted_to_floor_passes_silently() {
        let (scanner, weights) = scanner_with(builtin_catalog());
        let set = scanner.store.snapshot();
        let pattern = set.find("critical.secrets.aws-access-key").unwrap();
        weights.apply_update(pattern.weight_slot, 0.1, 1);

        let outcome = scanner.scan("AKIA1234567890ABCDEF");
        assert_eq!(outcome.verdict, Verdict::Pass);
    }

    #[test]
    fn test_ultra_only_mode_skips_lower_tiers() {
        let (scanner, _) = scanner_with(builtin_catalog());
        scanner.state.ultra_only.store(true, Ordering::Relaxed);
        // HIGH pattern would normally warn; in ultra-only mode it passes.
        let outcome = scanner.scan("とりあえずこれで修正");
        assert_eq!(outcome.verdict, Verdict::Pass);
        // Ultra patterns still block.
        let outcome = scanner.scan("AKIA1234567890ABCDEF");
        assert!(outcome.verdict.blocks());
    }

    #[test]
    fn test_large_input_still_detects_secret() {
        let (scanner, _) = scanner_with(builtin_catalog());
        let mut content = "fn ok() {}\n".repeat(1000);
        content.insert_str(5000, "AKIA1234567890ABCDEF");
        let outcome = scanner.scan(&content);
        assert!(outcome.verdict.blocks());
    }

    #[test]
    fn test_determinism_with_fixed_weights() {
        let (scanner, _) = scanner_with(builtin_catalog());
        for input in ["sudo rm -rf /", "とりあえず", "clean text", "console.log(1)"] {
            let a = scanner.scan(input).verdict;
            let b = scanner.scan(input).verdict;
            assert_eq!(a, b, "non-deterministic verdict for {input}");
        }
    }

    #[test]
    fn test_unanchored_pattern_scans_full_input() {
        // A pattern with no scan-view anchors must still hit content that
        // the bounded view would have dropped.
        let mut specs = builtin_catalog();
        specs.push(PatternSpec::new(
            "high.custom.internal-endpoint",
            r"internal-billing-gateway",
            "internal endpoint reference",
            Severity::High,
            Category::Reliability,
        ));
        let (scanner, _) = scanner_with(specs);

        let mut content = "x".repeat(3000);
        content.insert_str(1500, "internal-billing-gateway");
        let outcome = scanner.scan(&content);
        assert!(matches!(outcome.verdict, Verdict::Warn { .. }));
    }
}
