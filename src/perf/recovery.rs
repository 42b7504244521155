//! Error recovery and stability mode
//!
//! Budget violations, memory overflow, and publish failures trigger a
//! recovery strategy. Three recoveries inside a sliding 60s window put the
//! engine in stability mode: learner and generator off, budgets relaxed,
//! caches cleared. Stability mode persists until an explicit reset.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Feature flags shared by every subsystem. All reads are single relaxed
/// atomic loads, safe on the hot path.
#[derive(Debug)]
pub struct EngineState {
    /// Learner worker applies updates
    pub learning_enabled: AtomicBool,
    /// Hot path enqueues learning tasks (optimizer can pause this alone)
    pub enqueue_enabled: AtomicBool,
    /// Generator accepts contexts and publishes candidates
    pub generation_enabled: AtomicBool,
    /// Scan only the ULTRA_CRITICAL tier
    pub ultra_only: AtomicBool,
    /// Allow everything through with a warning (recovery strategy)
    pub bypass_temporarily: AtomicBool,
    /// Degraded operating mode; relaxed budgets
    pub stability_mode: AtomicBool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            learning_enabled: AtomicBool::new(true),
            enqueue_enabled: AtomicBool::new(true),
            generation_enabled: AtomicBool::new(true),
            ultra_only: AtomicBool::new(false),
            bypass_temporarily: AtomicBool::new(false),
            stability_mode: AtomicBool::new(false),
        }
    }
}

impl EngineState {
    #[inline]
    pub fn stability_mode(&self) -> bool {
        self.stability_mode.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn learning_active(&self) -> bool {
        self.learning_enabled.load(Ordering::Relaxed)
            && self.enqueue_enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn generation_active(&self) -> bool {
        self.generation_enabled.load(Ordering::Relaxed)
    }
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTrigger {
    MemoryOverflow,
    TimeoutViolation,
    PatternCompileFailure,
    HookIntegrationFailure,
}

/// What was done about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    ReduceCacheSize,
    ForceUltraFastOnly,
    FallbackToBasicPatterns,
    BypassTemporarily,
}

fn strategy_for(trigger: RecoveryTrigger) -> RecoveryStrategy {
    match trigger {
        RecoveryTrigger::MemoryOverflow => RecoveryStrategy::ReduceCacheSize,
        RecoveryTrigger::TimeoutViolation => RecoveryStrategy::ForceUltraFastOnly,
        RecoveryTrigger::PatternCompileFailure => RecoveryStrategy::FallbackToBasicPatterns,
        RecoveryTrigger::HookIntegrationFailure => RecoveryStrategy::BypassTemporarily,
    }
}

/// One degradation event, retained for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryRecord {
    pub trigger: RecoveryTrigger,
    pub strategy: RecoveryStrategy,
    pub success: bool,
    #[serde(skip)]
    pub at: Instant,
}

/// Degrades features when budgets are violated.
pub struct RecoveryController {
    state: std::sync::Arc<EngineState>,
    history: Mutex<VecDeque<RecoveryRecord>>,
    max_recoveries: usize,
    window: Duration,
    activations: AtomicU64,
    stability_entries: AtomicU64,
    /// Invoked when a strategy asks for cache eviction.
    cache_clear: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl RecoveryController {
    pub fn new(
        state: std::sync::Arc<EngineState>,
        max_recoveries: usize,
        window: Duration,
    ) -> Self {
        Self {
            state,
            history: Mutex::new(VecDeque::with_capacity(16)),
            max_recoveries,
            window,
            activations: AtomicU64::new(0),
            stability_entries: AtomicU64::new(0),
            cache_clear: Mutex::new(None),
        }
    }

    /// Wire the cache-eviction hook (learning rings + metrics buffers).
    pub fn set_cache_clear(&self, f: Box<dyn Fn() + Send + Sync>) {
        *self.cache_clear.lock() = Some(f);
    }

    /// Handle a trigger. Never called on the hot path itself; the scanner
    /// reports violations after the verdict is produced.
    pub fn notify(&self, trigger: RecoveryTrigger) {
        if self.state.stability_mode() {
            return;
        }
        self.activations.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let recent = {
            let mut history = self.history.lock();
            while let Some(front) = history.front() {
                if now.duration_since(front.at) > self.window {
                    history.pop_front();
                } else {
                    break;
                }
            }
            history.len()
        };

        if recent >= self.max_recoveries {
            self.enter_stability_mode();
            return;
        }

        let strategy = strategy_for(trigger);
        let success = self.execute(strategy);
        warn!(?trigger, ?strategy, success, "recovery strategy executed");

        self.history.lock().push_back(RecoveryRecord {
            trigger,
            strategy,
            success,
            at: now,
        });
    }

    fn execute(&self, strategy: RecoveryStrategy) -> bool {
        match strategy {
            RecoveryStrategy::ReduceCacheSize => {
                if let Some(clear) = self.cache_clear.lock().as_ref() {
                    clear();
                }
                true
            }
            RecoveryStrategy::ForceUltraFastOnly => {
                self.state.ultra_only.store(true, Ordering::Relaxed);
                true
            }
            RecoveryStrategy::FallbackToBasicPatterns => {
                self.state.learning_enabled.store(false, Ordering::Relaxed);
                self.state.generation_enabled.store(false, Ordering::Relaxed);
                true
            }
            RecoveryStrategy::BypassTemporarily => {
                self.state.bypass_temporarily.store(true, Ordering::Relaxed);
                true
            }
        }
    }

    fn enter_stability_mode(&self) {
        if self.state.stability_mode.swap(true, Ordering::Relaxed) {
            return;
        }
        self.stability_entries.fetch_add(1, Ordering::Relaxed);
        self.state.learning_enabled.store(false, Ordering::Relaxed);
        self.state.enqueue_enabled.store(false, Ordering::Relaxed);
        self.state.generation_enabled.store(false, Ordering::Relaxed);
        if let Some(clear) = self.cache_clear.lock().as_ref() {
            clear();
        }
        error!("stability mode engaged: learner and generator off, budgets relaxed");
    }

    /// Explicit operator reset; nothing re-enables automatically.
    pub fn reset(&self) {
        self.state.stability_mode.store(false, Ordering::Relaxed);
        self.state.learning_enabled.store(true, Ordering::Relaxed);
        self.state.enqueue_enabled.store(true, Ordering::Relaxed);
        self.state.generation_enabled.store(true, Ordering::Relaxed);
        self.state.ultra_only.store(false, Ordering::Relaxed);
        self.state.bypass_temporarily.store(false, Ordering::Relaxed);
        self.history.lock().clear();
        info!("stability mode reset");
    }

    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    pub fn history(&self) -> Vec<RecoveryRecord> {
        self.history.lock().iter().cloned().collect()
    }
}
