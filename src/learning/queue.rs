//! Bounded learning-task rings
//!
//! One lock-free ring per tier. Hot-path enqueue is O(1) and never blocks;
//! when a ring is full the oldest task is displaced.

use crate::models::{PatternId, Severity, Tier};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// One deferred learning event, produced on the hot path.
#[derive(Debug, Clone)]
pub struct LearningTask {
    pub pattern_id: PatternId,
    pub weight_slot: usize,
    pub tier: Tier,
    pub severity: Severity,
    /// Weighted confidence observed at match time.
    pub confidence: f64,
    /// Hot-path latency of the call that produced the match.
    pub latency_us: u64,
}

/// Direct weight adjustment, produced by the feedback path. Routed through
/// the learner so the weight table keeps a single writer.
#[derive(Debug, Clone)]
pub struct WeightAdjust {
    pub pattern_id: PatternId,
    pub weight_slot: usize,
    /// Multiplied into the current weight, clamped to [0, 1].
    pub factor: f64,
}

/// Per-tier bounded rings plus the feedback adjustment lane.
#[derive(Debug)]
pub struct TaskRings {
    rings: [ArrayQueue<LearningTask>; 3],
    adjustments: ArrayQueue<WeightAdjust>,
    displaced: AtomicU64,
    enqueued: AtomicU64,
}

impl TaskRings {
    pub fn new(capacities: [usize; 3]) -> Self {
        Self {
            rings: [
                ArrayQueue::new(capacities[0].max(1)),
                ArrayQueue::new(capacities[1].max(1)),
                ArrayQueue::new(capacities[2].max(1)),
            ],
            adjustments: ArrayQueue::new(64),
            displaced: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Lock-free enqueue with drop-oldest overflow.
    #[inline]
    pub fn push(&self, task: LearningTask) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if self.rings[task.tier.index()].force_push(task).is_some() {
            self.displaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn push_adjustment(&self, adjust: WeightAdjust) {
        if self.adjustments.force_push(adjust).is_some() {
            self.displaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Dequeue order: adjustments first, then tiers most-critical first.
    /// Strict FIFO across tiers is not required.
    pub fn pop_adjustment(&self) -> Option<WeightAdjust> {
        self.adjustments.pop()
    }

    pub fn pop_task(&self) -> Option<LearningTask> {
        for ring in &self.rings {
            if let Some(task) = ring.pop() {
                return Some(task);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rings.iter().map(|r| r.len()).sum::<usize>() + self.adjustments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn displaced(&self) -> u64 {
        self.displaced.load(Ordering::Relaxed)
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Drop everything; used by recovery cache eviction and shutdown.
    pub fn clear(&self) {
        while self.pop_task().is_some() {}
        while self.pop_adjustment().is_some() {}
    }
}
