//! Ultra-fast matcher
//!
//! Answers "does this input match any ULTRA_CRITICAL pattern?" inside a
//! 0.1ms budget. Matchers live in the pattern-set snapshot acquired by the
//! caller: no disk, no config lookup, no allocation on the match path.
//! Budget enforcement is elapsed-time sampling between patterns; running
//! out of budget means "no match from this tier", never an error.

use crate::engine::clock::GateClock;
use crate::engine::scan_view::ScanView;
use crate::models::Tier;
use crate::patterns::{CompiledPattern, PatternSet};
use std::sync::Arc;

/// Outcome of one tier sweep.
pub enum TierSweep<'a> {
    /// First matching pattern and its position in the sweep order; the
    /// caller resumes from `index + 1` if the hit falls below threshold.
    Hit(usize, &'a Arc<CompiledPattern>),
    NoMatch,
    /// The ordered sweep could not finish inside the tier budget.
    BudgetExhausted,
}

pub struct UltraFastMatcher {
    clock: GateClock,
}

impl UltraFastMatcher {
    pub fn new(clock: GateClock) -> Self {
        Self { clock }
    }

    /// Sweep the ULTRA_CRITICAL tier in selectivity order. `start_raw` is
    /// the call's clock origin; `budget_us` the tier's own budget.
    #[inline]
    pub fn scan<'a>(
        &self,
        set: &'a PatternSet,
        view: &ScanView<'_>,
        start_raw: u64,
        budget_us: u64,
    ) -> TierSweep<'a> {
        for (index, pattern) in set.tier(Tier::UltraCritical).iter().enumerate() {
            if self.clock.elapsed_us(start_raw) > budget_us {
                return TierSweep::BudgetExhausted;
            }
            let target = if pattern.windowed {
                view.windowed()
            } else {
                view.full()
            };
            if pattern.regex.is_match(target) {
                return TierSweep::Hit(index, pattern);
            }
        }
        TierSweep::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{builtin_catalog, PatternStore};

    fn set() -> std::sync::Arc<PatternSet> {
        let (store, _) = PatternStore::from_specs(&builtin_catalog(), 256);
        store.snapshot()
    }

    #[test]
    fn test_hits_pinned_secrets() {
        let set = set();
        let clock = GateClock::new();
        let matcher = UltraFastMatcher::new(clock.clone());

        let view = ScanView::build("AKIA1234567890ABCDEF", 1000);
        match matcher.scan(&set, &view, clock.raw(), 10_000) {
            TierSweep::Hit(_, p) => assert_eq!(p.id.as_str(), "critical.secrets.aws-access-key"),
            _ => panic!("expected hit"),
        }
        let view = ScanView::build("sudo rm -rf /var", 1000);
        match matcher.scan(&set, &view, clock.raw(), 10_000) {
            TierSweep::Hit(_, p) => assert!(p.id.as_str().starts_with("critical.commands")),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn test_no_match_on_benign_input() {
        let set = set();
        let matcher = UltraFastMatcher::new(GateClock::new());
        let clock = GateClock::new();
        let view = ScanView::build("ls -la /tmp", 1000);
        assert!(matches!(
            matcher.scan(&set, &view, clock.raw(), 10_000),
            TierSweep::NoMatch
        ));
    }

    #[test]
    fn test_exhausted_budget_is_not_an_error() {
        let set = set();
        let clock = GateClock::new();
        let matcher = UltraFastMatcher::new(clock.clone());
        let start = clock.raw();
        std::thread::sleep(std::time::Duration::from_millis(1));
        // Start tick is already 1ms old with a 0.1ms budget.
        let view = ScanView::build("AKIA1234567890ABCDEF", 1000);
        assert!(matches!(
            matcher.scan(&set, &view, start, 100),
            TierSweep::BudgetExhausted
        ));
    }
}
