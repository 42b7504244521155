//! Candidate classification
//!
//! Feature extraction over the regex source and its generating context;
//! severity and category follow the keyword decision tree. Classifier
//! confidence is always computed and reported: candidates under the
//! auto-publish threshold are flagged for review.

use crate::models::{Category, Severity};

const SECURITY_KEYWORDS: [&str; 9] = [
    "password", "token", "key", "secret", "auth", "login", "admin", "root", "sudo",
];

const QUALITY_KEYWORDS: [&str; 7] = [
    "todo", "fixme", "hack", "temp", "quick", "dirty", "workaround",
];

#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub has_security_keywords: bool,
    pub has_quality_keywords: bool,
    /// Regex-source length normalized to [0, 1].
    pub complexity: f64,
}

pub fn extract_features(source: &str, context: &str) -> Features {
    let haystack = format!("{} {}", source.to_lowercase(), context.to_lowercase());
    Features {
        has_security_keywords: SECURITY_KEYWORDS.iter().any(|k| haystack.contains(k)),
        has_quality_keywords: QUALITY_KEYWORDS.iter().any(|k| haystack.contains(k)),
        complexity: (source.len() as f64 / 100.0).min(1.0),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub severity: Severity,
    pub category: Category,
    pub confidence: f64,
}

/// Keyword decision tree: security keywords dominate, then quality, then
/// the caller's hint, then INFO.
pub fn classify(source: &str, context: &str, severity_hint: Option<Severity>) -> Classification {
    let features = extract_features(source, context);

    let severity = if features.has_security_keywords {
        Severity::Critical
    } else if features.has_quality_keywords {
        Severity::High
    } else {
        severity_hint.unwrap_or(Severity::Info)
    };

    let category = if features.has_security_keywords {
        Category::Security
    } else if features.has_quality_keywords {
        Category::Maintainability
    } else {
        Category::General
    };

    let mut confidence: f64 = 0.5;
    if features.has_security_keywords && severity == Severity::Critical {
        confidence += 0.3;
    }
    if features.has_quality_keywords && category == Category::Maintainability {
        confidence += 0.2;
    }

    Classification {
        severity,
        category,
        confidence: confidence.min(1.0),
    }
}

pub fn detect_security_context(content: &str) -> bool {
    let lower = content.to_lowercase();
    SECURITY_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn detect_quality_context(content: &str) -> bool {
    let lower = content.to_lowercase();
    QUALITY_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_keywords_classify_critical() {
        let c = classify(r"(api[_-]?key|token)[\s=:]+\S+", "", None);
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.category, Category::Security);
        assert!(c.confidence >= 0.8);
    }

    #[test]
    fn test_quality_keywords_classify_high() {
        let c = classify(r"(quick[_-]?fix|hack|workaround)", "", None);
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.category, Category::Maintainability);
        assert!(c.confidence >= 0.7);
    }

    #[test]
    fn test_hint_used_when_no_keywords() {
        let c = classify(r"[0-9]{6}-[0-9]{6}", "", Some(Severity::High));
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.category, Category::General);
        // Baseline confidence: flagged for review.
        assert!(c.confidence < 0.6);
    }

    #[test]
    fn test_context_contributes_features() {
        let c = classify(r"[a-z]{12}", "leaked password in config", None);
        assert_eq!(c.severity, Severity::Critical);
    }
}
