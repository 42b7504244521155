//! Self-observation and graceful degradation
//!
//! - Lock-free latency histograms and a bounded sample ring on the hot path
//! - Rolling aggregates recomputed on a fixed cadence by background work
//! - Recovery controller that degrades features when budgets are violated
//! - Adaptive optimizer that sheds load under memory or latency pressure

pub mod histogram;
pub mod metrics;
pub mod optimizer;
pub mod recovery;

pub use histogram::LatencyHistogram;
pub use metrics::{MetricsHub, MetricsSnapshot};
pub use optimizer::AdaptiveOptimizer;
pub use recovery::{EngineState, RecoveryController, RecoveryTrigger};
