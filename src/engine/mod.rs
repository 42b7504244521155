//! Analysis engine
//!
//! `QualityGateEngine` is the explicit handle owning every piece of
//! mutable state: pattern store, weight table, background workers,
//! metrics, and the recovery controller. Construct at startup, pass by
//! reference, shut down at exit. There are no process-wide singletons.

pub mod clock;
pub mod scan_view;
pub mod scanner;
pub mod ultrafast;

pub use clock::GateClock;

use crate::config::{self, EngineConfig};
use crate::error::GateError;
use crate::generation::{FeedbackKind, GenerationContext, PatternGenerator};
use crate::learning::{Learner, LearningTask, WeightTable};
use crate::learning::persist;
use crate::models::{AnalyzeMode, Verdict};
use crate::patterns::{self, PatternStore};
use crate::perf::{
    metrics::{estimate_memory_mb, MetricsSample},
    AdaptiveOptimizer, EngineState, MetricsHub, RecoveryController, RecoveryTrigger,
};
use scanner::{ScanOutcome, Scanner};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default weight-table capacity: loaded patterns plus headroom for
/// generated ones.
const WEIGHT_SLOT_HEADROOM: usize = 256;

pub struct QualityGateEngine {
    cfg: Arc<EngineConfig>,
    store: Arc<PatternStore>,
    weights: Arc<WeightTable>,
    state: Arc<EngineState>,
    metrics: Arc<MetricsHub>,
    recovery: Arc<RecoveryController>,
    learner: Arc<Learner>,
    generator: Arc<PatternGenerator>,
    scanner: Scanner,
}

impl QualityGateEngine {
    /// Build the engine from resolved configuration: catalogue document if
    /// one resolves, built-in set otherwise; persisted weights if present.
    pub fn new(cfg: EngineConfig) -> Result<Self, GateError> {
        let specs = match config::resolve_patterns_path() {
            Some(path) => match patterns::load_catalog_document(&path) {
                Ok(specs) => patterns::catalog::ensure_ultra_set(specs),
                Err(e) => {
                    warn!(error = %e, "catalogue unusable, falling back to built-in patterns");
                    patterns::builtin_catalog()
                }
            },
            None => patterns::builtin_catalog(),
        };
        let weights_path = config::resolve_state_dir().map(|dir| dir.join("weights.json"));
        Self::with_patterns(cfg, specs, weights_path)
    }

    /// Build with an explicit pattern set and optional weight persistence
    /// path. Startup-fatal only if every single pattern fails to compile.
    pub fn with_patterns(
        cfg: EngineConfig,
        specs: Vec<patterns::PatternSpec>,
        weights_path: Option<std::path::PathBuf>,
    ) -> Result<Self, GateError> {
        let cfg = Arc::new(cfg);
        let slot_capacity = specs.len() + WEIGHT_SLOT_HEADROOM;
        let (store, _skipped) = PatternStore::from_specs(&specs, slot_capacity);
        let store = Arc::new(store);
        if store.current().is_empty() {
            return Err(GateError::Config(
                "no pattern compiled; engine cannot start".into(),
            ));
        }

        let weights = Arc::new(WeightTable::new(slot_capacity));
        if let Some(path) = &weights_path {
            let slot_of: HashMap<String, usize> = store
                .snapshot()
                .iter_all()
                .filter(|p| p.has_weight_slot())
                .map(|p| (p.id.as_str().to_owned(), p.weight_slot))
                .collect();
            let applied = persist::restore_into(path, &slot_of, &weights);
            if applied > 0 {
                info!(applied, "persisted weights restored");
            }
        }

        info!(
            patterns = store.current().len(),
            scan_keywords = patterns::SCAN_KEYWORDS_VERSION,
            "engine pattern set ready"
        );

        let state = Arc::new(EngineState::default());
        let metrics = Arc::new(MetricsHub::new(
            cfg.metrics.ring_capacity,
            cfg.metrics.aggregate_cadence_us,
        ));
        let recovery = Arc::new(RecoveryController::new(
            Arc::clone(&state),
            cfg.recovery.max_recoveries,
            Duration::from_secs(cfg.recovery.window_secs),
        ));

        let learner = Arc::new(Learner::new(
            cfg.learning.clone(),
            Arc::clone(&weights),
            Arc::clone(&store),
            Arc::clone(&state),
            weights_path,
        ));

        let generator = Arc::new(PatternGenerator::new(
            cfg.generation.clone(),
            Arc::clone(&store),
            Arc::clone(&state),
            Arc::clone(&learner),
        ));

        // Recovery cache eviction: learning rings + metrics buffers. Weak
        // handles so the controller never keeps the workers alive.
        {
            let learner = Arc::downgrade(&learner);
            let metrics = Arc::clone(&metrics);
            let generator = Arc::downgrade(&generator);
            recovery.set_cache_clear(Box::new(move || {
                if let Some(learner) = learner.upgrade() {
                    learner.clear_queues();
                }
                metrics.clear();
                if let Some(generator) = generator.upgrade() {
                    generator.clear_queue();
                }
            }));
        }

        // Background maintenance on the learner tick: rolling aggregates
        // and adaptive optimization.
        let optimizer = Arc::new(AdaptiveOptimizer::new(
            Arc::clone(&state),
            Arc::clone(&metrics),
            Arc::clone(&recovery),
            cfg.metrics.memory_target_mb,
            cfg.metrics.memory_pressure_pct,
            cfg.total_budget_us,
        ));
        {
            let store = Arc::clone(&store);
            let weights = Arc::clone(&weights);
            let metrics = Arc::clone(&metrics);
            // Weak: the hook lives inside the learner, and the optimizer
            // reaches the recovery controller whose eviction hook reaches
            // back; strong captures here would cycle.
            let learner_for_hook = Arc::downgrade(&learner);
            let generator_for_hook = Arc::downgrade(&generator);
            let optimizer = Arc::clone(&optimizer);
            learner.set_maintenance(Box::new(move || {
                let learner_queue = learner_for_hook
                    .upgrade()
                    .map(|l| l.queue_len())
                    .unwrap_or(0);
                let generator_queue = generator_for_hook
                    .upgrade()
                    .map(|g| g.queue_len())
                    .unwrap_or(0);
                let memory_mb = estimate_memory_mb(
                    store.snapshot().estimated_bytes(),
                    weights.estimated_bytes(),
                    learner_queue,
                    metrics.ring_len(),
                    generator_queue,
                );
                let now_us = chrono::Utc::now().timestamp_micros().max(0) as u64;
                metrics.maybe_aggregate(now_us, memory_mb);
                optimizer.tick(memory_mb);
            }));
        }

        if cfg.learning.enabled {
            learner.start();
        } else {
            state
                .learning_enabled
                .store(false, std::sync::atomic::Ordering::Relaxed);
        }
        if cfg.generation.enabled {
            generator.start();
        } else {
            state
                .generation_enabled
                .store(false, std::sync::atomic::Ordering::Relaxed);
        }

        let scanner = Scanner::new(
            Arc::clone(&cfg),
            Arc::clone(&store),
            Arc::clone(&weights),
            Arc::clone(&state),
            Arc::clone(&metrics),
        );

        Ok(Self {
            cfg,
            store,
            weights,
            state,
            metrics,
            recovery,
            learner,
            generator,
            scanner,
        })
    }

    /// The single synchronous entry point. Never panics, never blocks on
    /// I/O, never returns an error to the caller: operational failures map
    /// to fail-open verdicts.
    pub fn analyze(&self, mode: AnalyzeMode, content: &str) -> Verdict {
        if let Some(flag) = config::active_bypass_flag() {
            self.metrics.record_bypass();
            tracing::trace!(flag, "bypassed by environment");
            return Verdict::Bypass;
        }
        if self.state.bypass_temporarily.load(std::sync::atomic::Ordering::Relaxed) {
            self.metrics.record_bypass();
            return Verdict::Bypass;
        }

        if content.trim().is_empty() {
            return Verdict::NoContent;
        }
        if content.len() > self.cfg.max_content_bytes {
            return Verdict::Error {
                message: format!(
                    "content exceeds {} byte limit",
                    self.cfg.max_content_bytes
                ),
            };
        }

        let outcome = self.scanner.scan(content);
        self.finish_call(mode, content, outcome)
    }

    fn finish_call(&self, mode: AnalyzeMode, content: &str, outcome: ScanOutcome) -> Verdict {
        self.metrics.record_call(MetricsSample {
            ts_us: chrono::Utc::now().timestamp_micros().max(0) as u64,
            latency_us: outcome.elapsed_us,
            tier_reached: outcome.tier_reached,
            matched: outcome.matched.as_ref().map(|m| m.pattern.id.clone()),
            error: outcome.matcher_errors > 0,
        });

        if matches!(outcome.verdict, Verdict::Timeout) {
            self.metrics.record_timeout();
            self.recovery.notify(RecoveryTrigger::TimeoutViolation);
        }

        if let Some(matched) = &outcome.matched {
            if self.state.learning_active() {
                self.learner.enqueue(LearningTask {
                    pattern_id: matched.pattern.id.clone(),
                    weight_slot: matched.pattern.weight_slot,
                    tier: matched.pattern.tier,
                    severity: matched.pattern.severity,
                    confidence: matched.confidence,
                    latency_us: outcome.elapsed_us,
                });
            }
            if self.state.generation_active()
                && matched.pattern.severity != crate::models::Severity::Info
            {
                self.generator.observe(GenerationContext::matched_input(
                    mode,
                    content,
                    &matched.pattern.source,
                    matched.pattern.severity,
                ));
            }
        }

        outcome.verdict
    }

    /// Route host feedback into the learner and generator.
    pub fn adapt_from_feedback(
        &self,
        pattern_id: &str,
        kind: FeedbackKind,
        payload: &str,
    ) -> bool {
        self.generator.adapt_from_feedback(pattern_id, kind, payload)
    }

    /// Leave stability mode and re-enable degraded features.
    pub fn reset_stability(&self) {
        self.recovery.reset();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    pub fn weights(&self) -> &Arc<WeightTable> {
        &self.weights
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<MetricsHub> {
        &self.metrics
    }

    pub fn recovery(&self) -> &Arc<RecoveryController> {
        &self.recovery
    }

    pub fn learner(&self) -> &Arc<Learner> {
        &self.learner
    }

    pub fn generator(&self) -> &Arc<PatternGenerator> {
        &self.generator
    }

    /// Stop background workers, flush weights, release resources.
    /// In-flight `analyze` calls on other threads complete unaffected.
    pub fn shutdown(&self) {
        self.generator.shutdown();
        self.learner.shutdown();
        info!("engine shut down");
    }
}

impl Drop for QualityGateEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
