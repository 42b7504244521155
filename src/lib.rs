//! QualityGate - Tiered Pattern Analysis Engine
//!
//! A code-quality and security gate that inspects proposed edits and shell
//! commands before they are applied. Runs in the hot path of an
//! interactive assistant, so every call fits a 1.5ms budget:
//! - Tiered scanning with per-tier budgets (ULTRA_CRITICAL 0.1ms,
//!   CRITICAL_FAST 0.3ms, HIGH_NORMAL 0.8ms)
//! - Lock-free weight reads; learning happens on a background worker
//! - Pattern generation and auto-rules, validated before publication
//! - Metrics, adaptive optimization, and recovery with stability mode

pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod learning;
pub mod models;
pub mod patterns;
pub mod perf;

pub use engine::QualityGateEngine;
pub use error::GateError;
pub use models::{AnalyzeMode, Report, Severity, Tier, Verdict};
