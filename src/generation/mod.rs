//! Pattern generation and auto-rule creation
//!
//! Everything here runs off the hot path, on the generator worker thread
//! or the host's feedback calls. Candidates must pass compile,
//! effectiveness, and false-positive validation before they are published;
//! the classifier assigns severity and category and low-confidence
//! candidates are flagged for review instead of auto-published.

pub mod classifier;
pub mod feedback;
pub mod generator;
pub mod rules;
pub mod validator;

pub use classifier::{classify, Classification};
pub use feedback::FeedbackKind;
pub use generator::{ContextKind, GenerationContext, PatternCandidate, PatternGenerator};
pub use rules::{AutoRule, BasePattern, EscalationTrigger, RuleStrategy};
pub use validator::{validate_source, ValidationReport};
