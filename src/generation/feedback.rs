//! Feedback adaptation constants
//!
//! False positives decay the pattern's learned weight multiplicatively;
//! false negatives spawn a candidate from the missed content (handled in
//! the generator); accuracy reports nudge the weight proportionally.

use serde::Deserialize;

/// Multiplier applied to a pattern's weight on a confirmed false positive.
pub const FALSE_POSITIVE_ADJUSTMENT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    FalsePositive,
    FalseNegative,
    Accuracy,
}

/// Map a reported accuracy in [0, 1] to a mild multiplicative factor:
/// perfect accuracy leaves the weight alone, zero accuracy decays it by
/// the same step a false positive would.
pub fn accuracy_adjustment(accuracy: f64) -> f64 {
    let accuracy = accuracy.clamp(0.0, 1.0);
    FALSE_POSITIVE_ADJUSTMENT + (1.0 - FALSE_POSITIVE_ADJUSTMENT) * accuracy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_adjustment_bounds() {
        assert_eq!(accuracy_adjustment(1.0), 1.0);
        assert_eq!(accuracy_adjustment(0.0), FALSE_POSITIVE_ADJUSTMENT);
        assert_eq!(accuracy_adjustment(5.0), 1.0);
        let mid = accuracy_adjustment(0.5);
        assert!(mid > FALSE_POSITIVE_ADJUSTMENT && mid < 1.0);
    }
}
