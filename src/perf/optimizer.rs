//! Adaptive optimization
//!
//! Periodic pressure check run from the background worker tick. Under
//! memory pressure it evicts the oldest buffered entries; under latency
//! pressure it pauses learner enqueues and throttles generation. Both are
//! load-shedding measures, not recovery: the recovery controller handles
//! hard violations.

use crate::perf::{EngineState, MetricsHub, RecoveryController, RecoveryTrigger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Error-rate ceiling before the recovery controller is involved.
const MATCHER_ERROR_RATE_LIMIT: f64 = 0.05;

pub struct AdaptiveOptimizer {
    state: Arc<EngineState>,
    metrics: Arc<MetricsHub>,
    recovery: Arc<RecoveryController>,
    memory_target_mb: f64,
    memory_pressure_pct: f64,
    latency_budget_us: u64,
    adjustments: AtomicU64,
    /// Ticks remaining until paused enqueues resume.
    enqueue_pause_ticks: AtomicU64,
    /// Ticks remaining until throttled generation resumes. Only set when
    /// the optimizer itself paused generation.
    generation_pause_ticks: AtomicU64,
}

impl AdaptiveOptimizer {
    pub fn new(
        state: Arc<EngineState>,
        metrics: Arc<MetricsHub>,
        recovery: Arc<RecoveryController>,
        memory_target_mb: f64,
        memory_pressure_pct: f64,
        latency_budget_us: u64,
    ) -> Self {
        Self {
            state,
            metrics,
            recovery,
            memory_target_mb,
            memory_pressure_pct,
            latency_budget_us,
            adjustments: AtomicU64::new(0),
            enqueue_pause_ticks: AtomicU64::new(0),
            generation_pause_ticks: AtomicU64::new(0),
        }
    }

    /// One pressure check. `memory_estimate_mb` comes from the caller's
    /// component-sum estimate.
    pub fn tick(&self, memory_estimate_mb: f64) {
        if self.state.stability_mode() {
            return;
        }

        // Resume enqueues once the pause expires.
        let pause = self.enqueue_pause_ticks.load(Ordering::Relaxed);
        if pause > 0 {
            let left = pause - 1;
            self.enqueue_pause_ticks.store(left, Ordering::Relaxed);
            if left == 0 && self.state.learning_enabled.load(Ordering::Relaxed) {
                self.state.enqueue_enabled.store(true, Ordering::Relaxed);
            }
        }
        let pause = self.generation_pause_ticks.load(Ordering::Relaxed);
        if pause > 0 {
            let left = pause - 1;
            self.generation_pause_ticks.store(left, Ordering::Relaxed);
            // learning_enabled doubles as the "not degraded by recovery"
            // signal; a fallback that disabled the generator stays in force.
            if left == 0 && self.state.learning_enabled.load(Ordering::Relaxed) {
                self.state.generation_enabled.store(true, Ordering::Relaxed);
            }
        }

        let mut adjusted = false;

        let memory_pressure = memory_estimate_mb / self.memory_target_mb * 100.0;
        if memory_pressure > self.memory_pressure_pct {
            self.metrics.evict_oldest();
            self.pause_enqueues(16);
            self.throttle_generation(16);
            adjusted = true;
        }
        // Past the target itself is no longer load-shedding territory.
        if memory_pressure > 100.0 {
            self.recovery.notify(RecoveryTrigger::MemoryOverflow);
        }

        let rolling = self.metrics.rolling();
        let latency_limit = self.latency_budget_us as f64 * 1.5;
        if rolling.avg_latency_us > latency_limit && rolling.updated_at_us > 0 {
            self.pause_enqueues(8);
            self.throttle_generation(8);
            adjusted = true;
        }

        // Matchers erroring on a sustained fraction of calls means the
        // integration itself is unhealthy.
        if rolling.error_rate > MATCHER_ERROR_RATE_LIMIT && rolling.updated_at_us > 0 {
            self.recovery
                .notify(RecoveryTrigger::HookIntegrationFailure);
        }

        if adjusted {
            self.adjustments.fetch_add(1, Ordering::Relaxed);
            debug!(
                memory_estimate_mb,
                avg_latency_us = rolling.avg_latency_us,
                "adaptive optimization applied"
            );
        }
    }

    fn pause_enqueues(&self, ticks: u64) {
        self.state.enqueue_enabled.store(false, Ordering::Relaxed);
        self.enqueue_pause_ticks.fetch_max(ticks, Ordering::Relaxed);
    }

    /// Pause generation only if it was running; a config- or
    /// recovery-disabled generator stays off.
    fn throttle_generation(&self, ticks: u64) {
        if self.state.generation_enabled.swap(false, Ordering::Relaxed) {
            self.generation_pause_ticks.fetch_max(ticks, Ordering::Relaxed);
        }
    }

    pub fn adjustments(&self) -> u64 {
        self.adjustments.load(Ordering::Relaxed)
    }
}
