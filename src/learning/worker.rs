//! Background learning worker
//!
//! One dedicated thread: parks on its input rings, wakes on enqueue or a
//! ~10ms tick, applies at most K updates per wake inside a soft
//! microbudget, and periodically persists weights. The hot path only ever
//! touches the lock-free rings and an unpark; the worker is the weight
//! table's single writer.

use crate::config::LearningConfig;
use crate::learning::persist::{self, WeightEntry};
use crate::learning::queue::{LearningTask, TaskRings, WeightAdjust};
use crate::learning::weights::WeightTable;
use crate::patterns::PatternStore;
use crate::perf::EngineState;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type MaintenanceHook = Box<dyn Fn() + Send + Sync>;

struct LearnerShared {
    rings: TaskRings,
    weights: Arc<WeightTable>,
    store: Arc<PatternStore>,
    state: Arc<EngineState>,
    cfg: LearningConfig,
    persist_path: Option<PathBuf>,
    shutdown: AtomicBool,
    signaled: AtomicBool,
    worker: OnceLock<std::thread::Thread>,
    processed: AtomicU64,
    discarded: AtomicU64,
    failures: AtomicU64,
    dirty: AtomicU64,
    maintenance: parking_lot::Mutex<Option<MaintenanceHook>>,
}

/// Handle owning the worker thread and the task rings.
pub struct Learner {
    shared: Arc<LearnerShared>,
    handle: parking_lot::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Learner {
    pub fn new(
        cfg: LearningConfig,
        weights: Arc<WeightTable>,
        store: Arc<PatternStore>,
        state: Arc<EngineState>,
        persist_path: Option<PathBuf>,
    ) -> Self {
        let shared = Arc::new(LearnerShared {
            rings: TaskRings::new(cfg.queue_capacities),
            weights,
            store,
            state,
            cfg,
            persist_path,
            shutdown: AtomicBool::new(false),
            signaled: AtomicBool::new(false),
            worker: OnceLock::new(),
            processed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            dirty: AtomicU64::new(0),
            maintenance: parking_lot::Mutex::new(None),
        });
        Self {
            shared,
            handle: parking_lot::Mutex::new(None),
        }
    }

    /// Periodic hook run on the worker thread each wake (metrics
    /// aggregation, adaptive optimization). Set before `start`.
    pub fn set_maintenance(&self, hook: MaintenanceHook) {
        *self.shared.maintenance.lock() = Some(hook);
    }

    /// Spawn the worker thread. Without it the engine stays correct; tasks
    /// just accumulate in the rings until displaced.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let joiner = std::thread::Builder::new()
            .name("qg-learner".into())
            .spawn(move || run_worker(shared))
            .expect("failed to spawn learning worker");
        *handle = Some(joiner);
    }

    /// Hot-path enqueue: bounded, lock-free, wakes the worker via unpark.
    #[inline]
    pub fn enqueue(&self, task: LearningTask) {
        if !self.shared.state.learning_active() {
            return;
        }
        self.shared.rings.push(task);
        self.wake();
    }

    /// Feedback-path weight adjustment, applied by the worker so the
    /// table keeps a single writer.
    pub fn adjust(&self, adjust: WeightAdjust) {
        self.shared.rings.push_adjustment(adjust);
        self.wake();
    }

    #[inline]
    fn wake(&self) {
        self.shared.signaled.store(true, Ordering::Release);
        if let Some(thread) = self.shared.worker.get() {
            thread.unpark();
        }
    }

    /// Cooperative variant: run one bounded batch on the caller's thread.
    /// Only for configurations that do not `start` the worker; the weight
    /// table expects a single writer.
    pub fn pump(&self) -> usize {
        self.shared.process_batch()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.rings.len()
    }

    pub fn processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.shared.discarded.load(Ordering::Relaxed)
    }

    pub fn displaced(&self) -> u64 {
        self.shared.rings.displaced()
    }

    /// Drop all pending tasks (recovery cache eviction).
    pub fn clear_queues(&self) {
        self.shared.rings.clear();
    }

    /// Stop the worker: pending tasks are discarded, weights persisted,
    /// resources released. The hot path remains correct afterwards.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.shared.worker.get() {
            thread.unpark();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("learning worker panicked during shutdown");
            }
        }
    }

    /// Persist current weights immediately (startup/tests).
    pub fn persist_now(&self) {
        self.shared.persist();
    }
}

impl LearnerShared {
    /// Apply at most `max_tasks_per_wake` updates within the soft budget.
    fn process_batch(&self) -> usize {
        if !self.state.learning_enabled.load(Ordering::Relaxed) {
            return 0;
        }
        let start = Instant::now();
        let mut applied = 0usize;

        while applied < self.cfg.max_tasks_per_wake {
            if start.elapsed().as_micros() as u64 > self.cfg.worker_budget_us {
                break;
            }
            if let Some(adjust) = self.rings.pop_adjustment() {
                self.apply_adjustment(&adjust);
                applied += 1;
            } else if let Some(task) = self.rings.pop_task() {
                if self.apply_task(&task) {
                    applied += 1;
                }
            } else {
                break;
            }
        }

        if applied > 0 && self.dirty.load(Ordering::Relaxed) >= self.cfg.persist_every {
            self.persist();
        }
        applied
    }

    fn apply_task(&self, task: &LearningTask) -> bool {
        let floor = self.cfg.confidence_floors[task.tier.index()];
        if task.confidence < floor {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let eta = self.cfg.learning_rates[task.tier.index()];
        let current = self.weights.get(task.weight_slot);
        let observed = task.confidence.min(1.0);
        let next = (1.0 - eta) * current + eta * observed;

        if self.weights.apply_update(task.weight_slot, next, now_us()) {
            self.processed.fetch_add(1, Ordering::Relaxed);
            self.dirty.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    fn apply_adjustment(&self, adjust: &WeightAdjust) {
        let current = self.weights.get(adjust.weight_slot);
        let next = (current * adjust.factor).clamp(0.0, 1.0);
        if self.weights.apply_update(adjust.weight_slot, next, now_us()) {
            self.processed.fetch_add(1, Ordering::Relaxed);
            self.dirty.fetch_add(1, Ordering::Relaxed);
            debug!(pattern = %adjust.pattern_id, factor = adjust.factor, next,
                "feedback weight adjustment applied");
        }
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else {
            self.dirty.store(0, Ordering::Relaxed);
            return;
        };
        let mut entries: HashMap<String, WeightEntry> = HashMap::new();
        for pattern in self.store.snapshot().iter_all() {
            if !pattern.has_weight_slot() {
                continue;
            }
            let updated_at = self.weights.last_updated_us(pattern.weight_slot);
            if updated_at == 0 {
                continue;
            }
            entries.insert(
                pattern.id.as_str().to_owned(),
                WeightEntry {
                    weight: self.weights.get(pattern.weight_slot),
                    updated_at,
                },
            );
        }
        match persist::save(path, entries) {
            Ok(()) => {
                self.dirty.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "weight persistence failed");
            }
        }
    }
}

fn run_worker(shared: Arc<LearnerShared>) {
    shared
        .worker
        .set(std::thread::current())
        .expect("worker registered twice");
    info!("learning worker started");

    let tick = Duration::from_micros(shared.cfg.worker_tick_us);
    loop {
        if !shared.signaled.swap(false, Ordering::Acquire)
            && !shared.shutdown.load(Ordering::Acquire)
        {
            std::thread::park_timeout(tick);
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if let Some(hook) = shared.maintenance.lock().as_ref() {
            hook();
        }
        shared.process_batch();
    }

    // Pending tasks are discarded; current weights are flushed.
    let pending = shared.rings.len();
    shared.rings.clear();
    shared.persist();
    info!(discarded_pending = pending, "learning worker stopped");
}

fn now_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PatternId, Severity, Tier};
    use crate::patterns::{builtin_catalog, PatternStore};

    fn learner(persist_path: Option<PathBuf>) -> (Learner, Arc<WeightTable>) {
        let weights = Arc::new(WeightTable::new(64));
        let (store, _) = PatternStore::from_specs(&builtin_catalog(), 64);
        let learner = Learner::new(
            LearningConfig::default(),
            Arc::clone(&weights),
            Arc::new(store),
            Arc::new(EngineState::default()),
            persist_path,
        );
        (learner, weights)
    }

    fn task(slot: usize, tier: Tier, confidence: f64) -> LearningTask {
        LearningTask {
            pattern_id: PatternId::new("critical.secrets.api-secret"),
            weight_slot: slot,
            tier,
            severity: Severity::Critical,
            confidence,
            latency_us: 20,
        }
    }

    #[test]
    fn test_ewma_update_applied() {
        let (learner, weights) = learner(None);
        learner.enqueue(task(0, Tier::HighNormal, 0.8));
        let applied = learner.pump();
        assert_eq!(applied, 1);
        // eta 0.01: 0.99 * 1.0 + 0.01 * 0.8 = 0.998
        assert!((weights.get(0) - 0.998).abs() < 1e-6);
    }

    #[test]
    fn test_below_floor_discarded() {
        let (learner, weights) = learner(None);
        // ULTRA floor is 0.95.
        learner.enqueue(task(0, Tier::UltraCritical, 0.90));
        learner.pump();
        assert_eq!(learner.discarded(), 1);
        assert_eq!(weights.get(0), 1.0);
    }

    #[test]
    fn test_batch_limit_per_wake() {
        let (learner, _weights) = learner(None);
        for _ in 0..10 {
            learner.enqueue(task(1, Tier::HighNormal, 0.9));
        }
        let applied = learner.pump();
        assert!(applied <= LearningConfig::default().max_tasks_per_wake);
    }

    #[test]
    fn test_adjustment_multiplies_weight() {
        let (learner, weights) = learner(None);
        learner.adjust(WeightAdjust {
            pattern_id: PatternId::new("p"),
            weight_slot: 2,
            factor: 0.9,
        });
        learner.pump();
        assert!((weights.get(2) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_worker_thread_applies_and_shuts_down() {
        let (learner, weights) = learner(None);
        learner.start();
        learner.enqueue(task(3, Tier::HighNormal, 0.5));
        for _ in 0..200 {
            if weights.get(3) < 1.0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(weights.get(3) < 1.0);
        learner.shutdown();
        // Hot path still accepts enqueues after shutdown.
        learner.enqueue(task(3, Tier::HighNormal, 0.9));
    }

    #[test]
    fn test_shutdown_persists_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        let (learner, _weights) = learner(Some(path.clone()));
        learner.start();
        learner.enqueue(task(0, Tier::HighNormal, 0.9));
        for _ in 0..200 {
            if learner.processed() > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(learner.processed() > 0);
        learner.shutdown();
        let file = persist::load(&path).unwrap();
        assert!(file.is_some());
        assert!(!file.unwrap().weights.is_empty());
    }
}
