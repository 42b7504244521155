//! Error kinds for fallible boundaries
//!
//! The hot path never returns these to the caller; internal failures are
//! mapped to a verdict (fail-open). Background subsystems fail locally and
//! may notify the recovery controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Configuration source unreadable or malformed. Fatal at startup,
    /// a warning at runtime.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single pattern's regex is invalid. Skipped, never fatal.
    #[error("pattern '{id}' failed to compile: {source}")]
    PatternCompile {
        id: String,
        #[source]
        source: Box<regex::Error>,
    },

    /// A tier or call exceeded its time budget.
    #[error("time budget exceeded after {elapsed_us}us")]
    BudgetExceeded { elapsed_us: u64 },

    /// Memory estimate over target.
    #[error("resource pressure: {0}")]
    ResourcePressure(String),

    /// A matcher failed during evaluation; treated as no-match for the call.
    #[error("matcher failure in pattern '{0}'")]
    MatcherFailure(String),

    /// Background worker errored on a task; the task is discarded.
    #[error("learner failure: {0}")]
    Learner(String),

    /// A candidate or auto-rule failed validation or could not be published.
    #[error("publish rejected: {0}")]
    PublishConflict(String),

    /// Persistent failures degraded the engine to its minimal feature set.
    #[error("stability mode engaged")]
    StabilityModeEngaged,
}
