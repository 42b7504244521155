//! Learned confidence weights
//!
//! Fixed-capacity struct-of-arrays keyed by pattern weight slot. Readers
//! are on the hot path: one relaxed atomic load, never a lock, never a
//! torn value (weights are single fixed-width cells). Writes carry a
//! timestamp and only land if newer than the stored one.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Default weight for unknown or unlearned patterns.
pub const DEFAULT_WEIGHT: f32 = 1.0;

/// Confidence multiplier table, one entry per allocated weight slot.
#[derive(Debug)]
pub struct WeightTable {
    weights: Box<[AtomicU32]>,
    stamps: Box<[AtomicU64]>,
}

impl WeightTable {
    pub fn new(capacity: usize) -> Self {
        let weights = (0..capacity)
            .map(|_| AtomicU32::new(DEFAULT_WEIGHT.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let stamps = (0..capacity)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { weights, stamps }
    }

    pub fn capacity(&self) -> usize {
        self.weights.len()
    }

    /// Hot-path read. Out-of-range slots (including the `usize::MAX`
    /// unweighted sentinel) return the default weight.
    #[inline]
    pub fn get(&self, slot: usize) -> f64 {
        match self.weights.get(slot) {
            Some(cell) => f32::from_bits(cell.load(Ordering::Relaxed)) as f64,
            None => DEFAULT_WEIGHT as f64,
        }
    }

    /// Single-writer update: lands only if `ts_us` is at least as new as
    /// the stored stamp. The weight is clamped to [0, 1] before storing,
    /// so no reader can ever observe an out-of-range value.
    pub fn apply_update(&self, slot: usize, weight: f64, ts_us: u64) -> bool {
        let Some(stamp) = self.stamps.get(slot) else {
            return false;
        };
        let prev = stamp.fetch_max(ts_us, Ordering::AcqRel);
        if prev > ts_us {
            return false;
        }
        let clamped = weight.clamp(0.0, 1.0) as f32;
        self.weights[slot].store(clamped.to_bits(), Ordering::Release);
        true
    }

    /// Stamp of the last applied update, microseconds.
    pub fn last_updated_us(&self, slot: usize) -> u64 {
        self.stamps
            .get(slot)
            .map(|s| s.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Rough heap footprint for the memory estimator.
    pub fn estimated_bytes(&self) -> usize {
        self.weights.len() * (4 + 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weight() {
        let table = WeightTable::new(8);
        assert_eq!(table.get(0), 1.0);
        assert_eq!(table.get(7), 1.0);
        // Out-of-range and sentinel slots fall back to the default.
        assert_eq!(table.get(8), 1.0);
        assert_eq!(table.get(usize::MAX), 1.0);
    }

    #[test]
    fn test_update_clamps_to_unit_interval() {
        let table = WeightTable::new(4);
        table.apply_update(0, 3.5, 1);
        assert_eq!(table.get(0), 1.0);
        table.apply_update(0, -0.5, 2);
        assert_eq!(table.get(0), 0.0);
    }

    #[test]
    fn test_stale_update_rejected() {
        let table = WeightTable::new(4);
        assert!(table.apply_update(1, 0.5, 100));
        assert!(!table.apply_update(1, 0.9, 50));
        assert_eq!(table.get(1), 0.5);
        assert_eq!(table.last_updated_us(1), 100);
    }

    #[test]
    fn test_equal_timestamp_accepted() {
        let table = WeightTable::new(4);
        assert!(table.apply_update(2, 0.4, 10));
        assert!(table.apply_update(2, 0.6, 10));
        assert_eq!(table.get(2), 0.6);
    }

    #[test]
    fn test_concurrent_readers_see_valid_range() {
        use std::sync::Arc;

        let table = Arc::new(WeightTable::new(16));
        let writer = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for i in 0..10_000u64 {
                    let w = (i % 100) as f64 / 100.0;
                    table.apply_update((i % 16) as usize, w, i + 1);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..50_000usize {
                        let w = table.get(i % 16);
                        assert!((0.0..=1.0).contains(&w), "weight out of range: {w}");
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
