//! Rolling metrics
//!
//! The hot path records one sample per call into a lock-free bounded ring
//! plus atomic counters and histograms. Rolling aggregates are recomputed
//! on a ~10ms cadence by the background worker, never inline.

use crate::models::{PatternId, Tier};
use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// One observation per `analyze` call.
#[derive(Debug, Clone)]
pub struct MetricsSample {
    pub ts_us: u64,
    pub latency_us: u64,
    pub tier_reached: Option<Tier>,
    pub matched: Option<PatternId>,
    pub error: bool,
}

/// Rolling aggregates, recomputed on cadence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollingStats {
    pub avg_latency_us: f64,
    pub p95_latency_us: u64,
    pub match_rate: f64,
    pub error_rate: f64,
    pub memory_estimate_mb: f64,
    pub updated_at_us: u64,
}

/// Full snapshot for diagnostics and the CLI status surface.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub matches: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bypasses: u64,
    pub matcher_failures: u64,
    pub rolling: RollingStats,
    pub latency: super::histogram::HistogramSnapshot,
}

/// Central metrics hub owned by the engine handle.
#[derive(Debug)]
pub struct MetricsHub {
    ring: ArrayQueue<MetricsSample>,
    calls: AtomicU64,
    matches: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    bypasses: AtomicU64,
    matcher_failures: AtomicU64,
    latency: super::LatencyHistogram,
    tier_latency: [super::LatencyHistogram; 3],
    rolling: RwLock<RollingStats>,
    last_aggregate_us: AtomicU64,
    cadence_us: u64,
}

impl MetricsHub {
    pub fn new(ring_capacity: usize, cadence_us: u64) -> Self {
        Self {
            ring: ArrayQueue::new(ring_capacity.max(16)),
            calls: AtomicU64::new(0),
            matches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            bypasses: AtomicU64::new(0),
            matcher_failures: AtomicU64::new(0),
            latency: super::LatencyHistogram::new(),
            tier_latency: [
                super::LatencyHistogram::new(),
                super::LatencyHistogram::new(),
                super::LatencyHistogram::new(),
            ],
            rolling: RwLock::new(RollingStats::default()),
            last_aggregate_us: AtomicU64::new(0),
            cadence_us,
        }
    }

    /// Hot-path record: counters, histogram, ring. All lock-free; a full
    /// ring evicts its oldest sample.
    #[inline]
    pub fn record_call(&self, sample: MetricsSample) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if sample.matched.is_some() {
            self.matches.fetch_add(1, Ordering::Relaxed);
        }
        if sample.error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.record(sample.latency_us);
        if let Some(tier) = sample.tier_reached {
            self.tier_latency[tier.index()].record(sample.latency_us);
        }
        let _ = self.ring.force_push(sample);
    }

    #[inline]
    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_matcher_failure(&self) {
        self.matcher_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Recompute rolling aggregates if the cadence has elapsed. Called
    /// from the background worker tick, never the hot path.
    pub fn maybe_aggregate(&self, now_us: u64, memory_estimate_mb: f64) -> bool {
        let last = self.last_aggregate_us.load(Ordering::Relaxed);
        if now_us.saturating_sub(last) < self.cadence_us {
            return false;
        }
        if self
            .last_aggregate_us
            .compare_exchange(last, now_us, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let calls = self.calls.load(Ordering::Relaxed);
        let matches = self.matches.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);

        let mut rolling = self.rolling.write();
        rolling.avg_latency_us = self.latency.mean_us();
        rolling.p95_latency_us = self.latency.p95();
        rolling.match_rate = if calls > 0 {
            matches as f64 / calls as f64
        } else {
            0.0
        };
        rolling.error_rate = if calls > 0 {
            errors as f64 / calls as f64
        } else {
            0.0
        };
        rolling.memory_estimate_mb = memory_estimate_mb;
        rolling.updated_at_us = now_us;
        true
    }

    pub fn rolling(&self) -> RollingStats {
        self.rolling.read().clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            matcher_failures: self.matcher_failures.load(Ordering::Relaxed),
            rolling: self.rolling(),
            latency: self.latency.snapshot(),
        }
    }

    pub fn tier_latency(&self, tier: Tier) -> &super::LatencyHistogram {
        &self.tier_latency[tier.index()]
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    /// Evict the oldest half of the sample ring. Adaptive-optimizer and
    /// recovery cache-reduction path.
    pub fn evict_oldest(&self) {
        let target = self.ring.len() / 2;
        for _ in 0..target {
            if self.ring.pop().is_none() {
                break;
            }
        }
    }

    /// Drop all buffered samples and histogram state.
    pub fn clear(&self) {
        while self.ring.pop().is_some() {}
        self.latency.reset();
        for h in &self.tier_latency {
            h.reset();
        }
    }
}

/// Component-sum memory estimate in megabytes, mirroring the engine's
/// bounded buffers. Deliberately cheap; no allocator introspection.
pub fn estimate_memory_mb(
    pattern_set_bytes: usize,
    weight_table_bytes: usize,
    learning_queue_len: usize,
    metrics_ring_len: usize,
    generation_queue_len: usize,
) -> f64 {
    let bytes = pattern_set_bytes
        + weight_table_bytes
        + learning_queue_len * 128
        + metrics_ring_len * 96
        + generation_queue_len * 1024;
    (bytes as f64 / (1024.0 * 1024.0)).min(100.0)
}
