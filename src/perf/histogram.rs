//! Lock-free latency histogram with logarithmic buckets
//!
//! Recording happens inside the hot path, so the buckets are plain atomic
//! counters. Bounds cover 1μs to 100ms with ~10-30% relative error; the
//! whole engine budget is 1.5ms, so everything past 100ms is overflow.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pre-computed logarithmic bucket boundaries (microseconds).
static BUCKET_BOUNDS: &[u64] = &[
    1,
    2,
    5,
    10,
    20,
    50,
    100,
    200,
    300,
    500,
    800,
    1_000,
    1_500,
    2_000,
    3_000,
    5_000,
    10_000,
    50_000,
    100_000,
    // Overflow bucket
    u64::MAX,
];

#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: Box<[AtomicU64]>,
    count: AtomicU64,
    sum_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_BOUNDS.len())
                .map(|_| AtomicU64::new(0))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        }
    }

    /// Record a latency sample in microseconds. Lock-free.
    #[inline]
    pub fn record(&self, latency_us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.min_us.fetch_min(latency_us, Ordering::Relaxed);
        self.max_us.fetch_max(latency_us, Ordering::Relaxed);

        // Binary search for bucket (faster than linear for 20 buckets)
        let idx = BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us);
        let bucket_idx = idx.min(self.buckets.len() - 1);
        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Percentile estimate in microseconds (upper bucket bound).
    pub fn percentile(&self, p: f64) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        let target = ((p / 100.0) * count as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            if cumulative >= target {
                return BUCKET_BOUNDS[i];
            }
        }
        self.max_us.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn p50(&self) -> u64 {
        self.percentile(50.0)
    }

    #[inline]
    pub fn p95(&self) -> u64 {
        self.percentile(95.0)
    }

    #[inline]
    pub fn p99(&self) -> u64 {
        self.percentile(99.0)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_us(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum_us.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn max_us(&self) -> u64 {
        self.max_us.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count();
        HistogramSnapshot {
            count,
            mean_us: self.mean_us(),
            min_us: if count == 0 {
                0
            } else {
                self.min_us.load(Ordering::Relaxed)
            },
            max_us: self.max_us(),
            p50_us: self.p50(),
            p95_us: self.p95(),
            p99_us: self.p99(),
        }
    }

    /// Reset all counters; used when recovery clears caches.
    pub fn reset(&self) {
        for bucket in self.buckets.iter() {
            bucket.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.sum_us.store(0, Ordering::Relaxed);
        self.min_us.store(u64::MAX, Ordering::Relaxed);
        self.max_us.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub mean_us: f64,
    pub min_us: u64,
    pub max_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}
