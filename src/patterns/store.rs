//! Lock-free pattern store
//!
//! `ArcSwap` snapshot semantics: readers take a guard once per call and see
//! a coherent, immutable `PatternSet`; publishers clone, modify, and swap
//! under a writer lock. Calls already in flight keep their old snapshot.

use crate::error::GateError;
use crate::models::{PatternId, Tier};
use crate::patterns::catalog::PatternSpec;
use crate::patterns::compile::{compile_spec, CompiledPattern};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable snapshot of every published pattern, grouped by tier.
#[derive(Debug)]
pub struct PatternSet {
    pub version: u64,
    tiers: [Vec<Arc<CompiledPattern>>; 3],
    total: usize,
}

impl PatternSet {
    fn empty() -> Self {
        Self {
            version: 0,
            tiers: [Vec::new(), Vec::new(), Vec::new()],
            total: 0,
        }
    }

    #[inline]
    pub fn tier(&self, tier: Tier) -> &[Arc<CompiledPattern>] {
        &self.tiers[tier.index()]
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &Arc<CompiledPattern>> {
        self.tiers.iter().flat_map(|t| t.iter())
    }

    pub fn find(&self, id: &str) -> Option<&Arc<CompiledPattern>> {
        self.iter_all().find(|p| p.id.as_str() == id)
    }

    /// Rough heap footprint for the memory estimator.
    pub fn estimated_bytes(&self) -> usize {
        self.iter_all()
            .map(|p| 4096 + p.source.len() * 64 + p.message.len())
            .sum()
    }

    /// Intra-tier order: static selectivity first (anchoring, literal
    /// prefix), then the priority score applied at this rebuild. The sort
    /// is stable, so insertion order remains the final tie-break. Severity
    /// plays no part here: it already decided the tier, and the scanner
    /// keeps informational matches from superseding warnings.
    fn sort_tiers(&mut self) {
        for tier in &mut self.tiers {
            tier.sort_by(|a, b| {
                b.selectivity.cmp(&a.selectivity).then(
                    b.priority
                        .partial_cmp(&a.priority)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
            });
        }
    }
}

/// Severity-grouped catalogue of compiled patterns with atomic publication.
#[derive(Debug)]
pub struct PatternStore {
    current: ArcSwap<PatternSet>,
    publish_lock: Mutex<()>,
    next_slot: AtomicUsize,
    slot_capacity: usize,
    publish_failures: AtomicU64,
}

impl PatternStore {
    /// Compile and load a catalogue. A pattern whose regex fails to
    /// compile is logged and skipped; it never prevents the remainder
    /// from loading. Returns the store and the number skipped.
    pub fn from_specs(specs: &[PatternSpec], slot_capacity: usize) -> (Self, usize) {
        let mut set = PatternSet::empty();
        let mut next_slot = 0usize;
        let mut skipped = 0usize;

        for spec in specs {
            let slot = if next_slot < slot_capacity {
                next_slot
            } else {
                usize::MAX
            };
            match compile_spec(spec, slot) {
                Ok(compiled) => {
                    if slot != usize::MAX {
                        next_slot += 1;
                    }
                    set.tiers[compiled.tier.index()].push(Arc::new(compiled));
                    set.total += 1;
                }
                Err(e) => {
                    warn!(pattern = %spec.id, error = %e, "pattern skipped at load");
                    skipped += 1;
                }
            }
        }

        set.version = 1;
        set.sort_tiers();
        info!(
            patterns = set.total,
            skipped,
            ultra = set.tier(Tier::UltraCritical).len(),
            critical_fast = set.tier(Tier::CriticalFast).len(),
            high_normal = set.tier(Tier::HighNormal).len(),
            "pattern store loaded"
        );

        (
            Self {
                current: ArcSwap::from_pointee(set),
                publish_lock: Mutex::new(()),
                next_slot: AtomicUsize::new(next_slot),
                slot_capacity,
                publish_failures: AtomicU64::new(0),
            },
            skipped,
        )
    }

    /// Hot-path snapshot access. One atomic load; the guard pins the set
    /// for the duration of the call.
    #[inline]
    pub fn current(&self) -> arc_swap::Guard<Arc<PatternSet>> {
        self.current.load()
    }

    pub fn snapshot(&self) -> Arc<PatternSet> {
        self.current.load_full()
    }

    /// Atomically publish a new pattern. Subsequent calls see it; calls
    /// already in flight do not. Failures are reported and the existing
    /// set continues to serve.
    pub fn publish(&self, spec: &PatternSpec) -> Result<PatternId, GateError> {
        let _guard = self.publish_lock.lock();

        let old = self.current.load_full();
        if old.find(&spec.id).is_some() {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
            return Err(GateError::PublishConflict(format!(
                "pattern id '{}' already published",
                spec.id
            )));
        }

        let slot = self.next_slot.load(Ordering::Relaxed);
        let slot = if slot < self.slot_capacity {
            slot
        } else {
            warn!(pattern = %spec.id, "weight slots exhausted, pattern runs unweighted");
            usize::MAX
        };

        let compiled = match compile_spec(spec, slot) {
            Ok(compiled) => compiled,
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        if slot != usize::MAX {
            self.next_slot.fetch_add(1, Ordering::Relaxed);
        }

        let id = compiled.id.clone();
        let tier = compiled.tier;

        let mut next = PatternSet {
            version: old.version + 1,
            tiers: old.tiers.clone(),
            total: old.total + 1,
        };
        next.tiers[tier.index()].push(Arc::new(compiled));
        next.sort_tiers();

        self.current.store(Arc::new(next));
        info!(pattern = %id, tier = %tier, "pattern published");
        Ok(id)
    }

    /// Slots handed out so far; also the number of weight-table entries in
    /// use.
    pub fn slots_used(&self) -> usize {
        self.next_slot.load(Ordering::Relaxed).min(self.slot_capacity)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Severity};
    use crate::patterns::catalog::builtin_catalog;

    #[test]
    fn test_load_skips_bad_patterns() {
        let mut specs = builtin_catalog();
        let good = specs.len();
        specs.push(PatternSpec::new(
            "bad.regex",
            r"([unclosed",
            "broken",
            Severity::High,
            Category::General,
        ));
        let (store, skipped) = PatternStore::from_specs(&specs, 256);
        assert_eq!(skipped, 1);
        assert_eq!(store.current().len(), good);
    }

    #[test]
    fn test_stable_order_across_reads() {
        let (store, _) = PatternStore::from_specs(&builtin_catalog(), 256);
        let a: Vec<String> = store
            .current()
            .tier(Tier::HighNormal)
            .iter()
            .map(|p| p.id.to_string())
            .collect();
        let b: Vec<String> = store
            .current()
            .tier(Tier::HighNormal)
            .iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tier_order_is_selectivity_first() {
        let (store, _) = PatternStore::from_specs(&builtin_catalog(), 256);
        let set = store.snapshot();
        for tier in Tier::ALL {
            let scores: Vec<u32> = set.tier(tier).iter().map(|p| p.selectivity).collect();
            let mut sorted = scores.clone();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            assert_eq!(scores, sorted, "tier {tier} not in selectivity order");
        }
    }

    #[test]
    fn test_publish_is_atomic_and_versioned() {
        let (store, _) = PatternStore::from_specs(&builtin_catalog(), 256);
        let before = store.snapshot();

        let spec = PatternSpec::new(
            "gen-test-1",
            r"droptable_[a-z]{8}",
            "generated",
            Severity::Critical,
            Category::Security,
        );
        store.publish(&spec).unwrap();

        let after = store.snapshot();
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.len(), before.len() + 1);
        // The pinned-down snapshot taken before publish is untouched.
        assert!(before.find("gen-test-1").is_none());
        assert!(after.find("gen-test-1").is_some());
        assert_eq!(
            after.find("gen-test-1").unwrap().tier,
            Tier::CriticalFast
        );
    }

    #[test]
    fn test_publish_duplicate_id_rejected() {
        let (store, _) = PatternStore::from_specs(&builtin_catalog(), 256);
        let spec = PatternSpec::new(
            "critical.secrets.api-secret",
            r"abc",
            "dup",
            Severity::Critical,
            Category::Security,
        );
        assert!(store.publish(&spec).is_err());
        assert_eq!(store.publish_failures(), 1);
    }

    #[test]
    fn test_slot_exhaustion_keeps_serving() {
        let (store, _) = PatternStore::from_specs(&builtin_catalog(), 2);
        let spec = PatternSpec::new(
            "gen-over",
            r"overflow_[0-9]+",
            "over",
            Severity::High,
            Category::General,
        );
        let id = store.publish(&spec).unwrap();
        let set = store.snapshot();
        assert!(!set.find(id.as_str()).unwrap().has_weight_slot());
    }
}
