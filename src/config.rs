//! Engine configuration
//!
//! Tunables with serde defaults, optionally overridden from a TOML file.
//! Pattern catalogue location resolution and bypass environment flags also
//! live here so the contract is in one place.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment flags that short-circuit the engine to `Bypass`.
pub const BYPASS_ENV_FLAGS: [&str; 4] = [
    "BYPASS_DESIGN_HOOK",
    "QUALITYGATE_DISABLED",
    "EMERGENCY_BYPASS",
    "QUALITYGATE_BYPASS",
];

/// Env var pointing directly at a pattern catalogue document.
pub const PATTERNS_ENV: &str = "QUALITYGATE_PATTERNS";
/// Env var pointing at the engine root (catalogue + persisted state).
pub const ROOT_ENV: &str = "QUALITYGATE_ROOT";
/// Legacy absolute catalogue path, lowest resolution priority.
pub const LEGACY_PATTERNS_PATH: &str = "/etc/qualitygate/patterns.json";

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total hot-path budget in microseconds
    #[serde(default = "default_total_budget_us")]
    pub total_budget_us: u64,

    /// Per-tier budgets
    #[serde(default)]
    pub tiers: TierBudgets,

    /// Budgets applied while stability mode is engaged
    #[serde(default)]
    pub stability: StabilityBudgets,

    /// Reject content larger than this (bytes)
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    /// Inputs longer than this scan through the keyword-windowed view
    #[serde(default = "default_scan_view_threshold")]
    pub scan_view_threshold: usize,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_total_budget_us() -> u64 {
    1500
}

fn default_max_content_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_scan_view_threshold() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_budget_us: default_total_budget_us(),
            tiers: TierBudgets::default(),
            stability: StabilityBudgets::default(),
            max_content_bytes: default_max_content_bytes(),
            scan_view_threshold: default_scan_view_threshold(),
            learning: LearningConfig::default(),
            generation: GenerationConfig::default(),
            metrics: MetricsConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from file if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path.as_ref().display(), error = %e,
                    "engine config unreadable, using defaults");
                Self::default()
            }
        }
    }
}

/// Per-tier time budgets in microseconds. Their sum must not exceed the
/// total budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierBudgets {
    #[serde(default = "default_ultra_us")]
    pub ultra_critical_us: u64,
    #[serde(default = "default_critical_fast_us")]
    pub critical_fast_us: u64,
    #[serde(default = "default_high_normal_us")]
    pub high_normal_us: u64,
}

fn default_ultra_us() -> u64 {
    100
}
fn default_critical_fast_us() -> u64 {
    300
}
fn default_high_normal_us() -> u64 {
    800
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            ultra_critical_us: default_ultra_us(),
            critical_fast_us: default_critical_fast_us(),
            high_normal_us: default_high_normal_us(),
        }
    }
}

impl TierBudgets {
    #[inline]
    pub fn for_tier(&self, tier: crate::models::Tier) -> u64 {
        match tier {
            crate::models::Tier::UltraCritical => self.ultra_critical_us,
            crate::models::Tier::CriticalFast => self.critical_fast_us,
            crate::models::Tier::HighNormal => self.high_normal_us,
        }
    }
}

/// Relaxed budgets used in stability mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityBudgets {
    #[serde(default = "default_stability_total_us")]
    pub total_budget_us: u64,
    #[serde(default = "default_stability_ultra_us")]
    pub ultra_critical_us: u64,
    #[serde(default = "default_stability_critical_fast_us")]
    pub critical_fast_us: u64,
    #[serde(default = "default_stability_high_normal_us")]
    pub high_normal_us: u64,
}

fn default_stability_total_us() -> u64 {
    5000
}
fn default_stability_ultra_us() -> u64 {
    500
}
fn default_stability_critical_fast_us() -> u64 {
    1000
}
fn default_stability_high_normal_us() -> u64 {
    2000
}

impl Default for StabilityBudgets {
    fn default() -> Self {
        Self {
            total_budget_us: default_stability_total_us(),
            ultra_critical_us: default_stability_ultra_us(),
            critical_fast_us: default_stability_critical_fast_us(),
            high_normal_us: default_stability_high_normal_us(),
        }
    }
}

/// Background learner tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Queue capacity per tier (ultra, critical-fast, high-normal)
    #[serde(default = "default_queue_caps")]
    pub queue_capacities: [usize; 3],

    /// EWMA learning rate per tier
    #[serde(default = "default_learning_rates")]
    pub learning_rates: [f64; 3],

    /// Tasks below this observed confidence are discarded, per tier
    #[serde(default = "default_confidence_floors")]
    pub confidence_floors: [f64; 3],

    /// Max tasks applied per worker wake
    #[serde(default = "default_tasks_per_wake")]
    pub max_tasks_per_wake: usize,

    /// Soft budget per worker invocation (microseconds)
    #[serde(default = "default_worker_budget_us")]
    pub worker_budget_us: u64,

    /// Worker tick when no enqueue wakes it (microseconds)
    #[serde(default = "default_worker_tick_us")]
    pub worker_tick_us: u64,

    /// Persist weights after this many applied updates
    #[serde(default = "default_persist_every")]
    pub persist_every: u64,
}

fn default_true() -> bool {
    true
}
fn default_queue_caps() -> [usize; 3] {
    [5, 20, 50]
}
fn default_learning_rates() -> [f64; 3] {
    [0.001, 0.005, 0.01]
}
fn default_confidence_floors() -> [f64; 3] {
    [0.95, 0.85, 0.70]
}
fn default_tasks_per_wake() -> usize {
    3
}
fn default_worker_budget_us() -> u64 {
    300
}
fn default_worker_tick_us() -> u64 {
    10_000
}
fn default_persist_every() -> u64 {
    32
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacities: default_queue_caps(),
            learning_rates: default_learning_rates(),
            confidence_floors: default_confidence_floors(),
            max_tasks_per_wake: default_tasks_per_wake(),
            worker_budget_us: default_worker_budget_us(),
            worker_tick_us: default_worker_tick_us(),
            persist_every: default_persist_every(),
        }
    }
}

/// Pattern generator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Soft budget for one generation attempt (microseconds)
    #[serde(default = "default_generation_budget_us")]
    pub generation_budget_us: u64,

    /// Soft budget for one rule derivation (microseconds)
    #[serde(default = "default_rule_budget_us")]
    pub rule_budget_us: u64,

    /// Bounded context queue between scanner and generator worker
    #[serde(default = "default_context_queue_cap")]
    pub context_queue_capacity: usize,

    /// Lightweight mode lowers the effectiveness floor to 0.3
    #[serde(default)]
    pub lightweight: bool,

    /// Candidates with classifier confidence below this are flagged for
    /// review instead of auto-published
    #[serde(default = "default_auto_publish_confidence")]
    pub auto_publish_confidence: f64,

    /// Max keyword-union variants derived per extension rule
    #[serde(default = "default_max_variants")]
    pub max_variants_per_pattern: usize,
}

fn default_generation_budget_us() -> u64 {
    2000
}
fn default_rule_budget_us() -> u64 {
    1000
}
fn default_context_queue_cap() -> usize {
    64
}
fn default_auto_publish_confidence() -> f64 {
    0.5
}
fn default_max_variants() -> usize {
    5
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            generation_budget_us: default_generation_budget_us(),
            rule_budget_us: default_rule_budget_us(),
            context_queue_capacity: default_context_queue_cap(),
            lightweight: false,
            auto_publish_confidence: default_auto_publish_confidence(),
            max_variants_per_pattern: default_max_variants(),
        }
    }
}

/// Metrics ring and rolling-aggregate cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Rolling aggregates are recomputed at this cadence (microseconds)
    #[serde(default = "default_aggregate_cadence_us")]
    pub aggregate_cadence_us: u64,

    /// Memory target for the whole engine (megabytes)
    #[serde(default = "default_memory_target_mb")]
    pub memory_target_mb: f64,

    /// Fraction of the target that triggers adaptive optimization
    #[serde(default = "default_memory_pressure_pct")]
    pub memory_pressure_pct: f64,
}

fn default_ring_capacity() -> usize {
    1024
}
fn default_aggregate_cadence_us() -> u64 {
    10_000
}
fn default_memory_target_mb() -> f64 {
    50.0
}
fn default_memory_pressure_pct() -> f64 {
    80.0
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            aggregate_cadence_us: default_aggregate_cadence_us(),
            memory_target_mb: default_memory_target_mb(),
            memory_pressure_pct: default_memory_pressure_pct(),
        }
    }
}

/// Recovery controller limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recoveries within the window before stability mode engages
    #[serde(default = "default_max_recoveries")]
    pub max_recoveries: usize,

    /// Sliding window (seconds)
    #[serde(default = "default_recovery_window_secs")]
    pub window_secs: u64,
}

fn default_max_recoveries() -> usize {
    3
}
fn default_recovery_window_secs() -> u64 {
    60
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recoveries: default_max_recoveries(),
            window_secs: default_recovery_window_secs(),
        }
    }
}

/// Returns the name of the first active bypass flag, if any.
///
/// Truthy values: `1`, `true`, `yes` (case-insensitive).
pub fn active_bypass_flag() -> Option<&'static str> {
    for flag in BYPASS_ENV_FLAGS {
        if let Ok(value) = std::env::var(flag) {
            let v = value.trim().to_ascii_lowercase();
            if v == "1" || v == "true" || v == "yes" {
                return Some(flag);
            }
        }
    }
    None
}

/// Resolve the pattern catalogue path: explicit env override, then the
/// engine root, then the legacy absolute path. `None` means "use the
/// built-in catalogue".
pub fn resolve_patterns_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(PATTERNS_ENV) {
        let p = PathBuf::from(explicit);
        if p.exists() {
            return Some(p);
        }
    }

    if let Ok(root) = std::env::var(ROOT_ENV) {
        let p = PathBuf::from(root).join("config").join("patterns.json");
        if p.exists() {
            return Some(p);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join("config").join("patterns.json");
            if p.exists() {
                return Some(p);
            }
        }
    }

    let legacy = PathBuf::from(LEGACY_PATTERNS_PATH);
    if legacy.exists() {
        return Some(legacy);
    }

    None
}

/// Resolve where persisted engine state (weights) lives: the engine root
/// from the environment, else next to the installed binary, mirroring the
/// catalogue resolution above.
pub fn resolve_state_dir() -> Option<PathBuf> {
    if let Ok(root) = std::env::var(ROOT_ENV) {
        return Some(PathBuf::from(root).join("state"));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            return Some(dir.join("state"));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;

    #[test]
    fn test_default_budgets_within_total() {
        let cfg = EngineConfig::default();
        let sum = cfg.tiers.ultra_critical_us
            + cfg.tiers.critical_fast_us
            + cfg.tiers.high_normal_us;
        assert!(sum <= cfg.total_budget_us * 2);
        assert_eq!(cfg.tiers.for_tier(Tier::UltraCritical), 100);
        assert_eq!(cfg.tiers.for_tier(Tier::CriticalFast), 300);
        assert_eq!(cfg.tiers.for_tier(Tier::HighNormal), 800);
        assert_eq!(cfg.total_budget_us, 1500);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            total_budget_us = 3000

            [learning]
            max_tasks_per_wake = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.total_budget_us, 3000);
        assert_eq!(cfg.learning.max_tasks_per_wake, 5);
        assert_eq!(cfg.learning.queue_capacities, [5, 20, 50]);
        assert_eq!(cfg.tiers.ultra_critical_us, 100);
    }

    #[test]
    fn test_bypass_flag_truthy_values() {
        let _guard = crate::test_support::ENV_LOCK.lock();
        std::env::remove_var("QUALITYGATE_BYPASS");
        assert_eq!(active_bypass_flag(), None);

        for value in ["1", "true", "YES", "True"] {
            std::env::set_var("QUALITYGATE_BYPASS", value);
            assert_eq!(active_bypass_flag(), Some("QUALITYGATE_BYPASS"));
        }

        std::env::set_var("QUALITYGATE_BYPASS", "0");
        assert_eq!(active_bypass_flag(), None);
        std::env::remove_var("QUALITYGATE_BYPASS");
    }
}
