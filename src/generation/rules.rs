//! Auto-rule derivation
//!
//! Three strategies over already-published patterns, referenced by opaque
//! id (never by pointer across the publication boundary):
//! - pattern_extension: union context keywords into an existing regex
//! - severity_escalation: publish a superseding pattern at a promoted
//!   severity under a stated trigger (severity never changes in place)
//! - context_adaptation: specialize a pattern to a detected domain

use crate::models::Severity;
use crate::patterns::catalog::derive_anchors;
use crate::patterns::PatternSpec;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStrategy {
    PatternExtension,
    SeverityEscalation,
    ContextAdaptation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    RepeatedViolations,
    SecurityContext,
    ProductionEnvironment,
}

/// Immutable attributes of a published pattern, resolved through the
/// store by id before derivation.
#[derive(Debug, Clone)]
pub struct BasePattern {
    pub id: String,
    pub source: String,
    pub severity: Severity,
    pub category: crate::models::Category,
}

/// A derived rule and the pattern spec it would publish.
#[derive(Debug, Clone)]
pub struct AutoRule {
    pub id: String,
    pub strategy: RuleStrategy,
    pub derived_from: Vec<String>,
    pub spec: PatternSpec,
    pub trigger: Option<EscalationTrigger>,
    pub created_at: DateTime<Utc>,
}

/// Domain keyword sets for context adaptation.
pub const DOMAIN_CONTEXTS: [(&str, [&str; 4]); 3] = [
    ("database", ["sql", "query", "db", "connection"]),
    ("api", ["endpoint", "route", "request", "response"]),
    ("security", ["auth", "login", "password", "token"]),
];

/// Union discovered keywords with the base regex:
/// `(kw1|kw2|kw3|<base>)`. Keywords are escaped; at most `max_variants`
/// are taken.
pub fn extension_rule(
    base: &BasePattern,
    keywords: &[String],
    max_variants: usize,
) -> Option<AutoRule> {
    if keywords.is_empty() {
        return None;
    }
    let alts: Vec<String> = keywords
        .iter()
        .take(max_variants.min(3))
        .map(|k| regex::escape(k))
        .collect();
    let source = format!("({}|{})", alts.join("|"), base.source);

    let id = format!("rule-ext-{}", Uuid::new_v4());
    let mut spec = PatternSpec::new(
        &id,
        source,
        format!("拡張ルールにより検出されました (基: {})", base.id),
        base.severity,
        base.category,
    );
    spec.anchors = derive_anchors(&spec.source);

    Some(AutoRule {
        id,
        strategy: RuleStrategy::PatternExtension,
        derived_from: vec![base.id.clone()],
        spec,
        trigger: None,
        created_at: Utc::now(),
    })
}

/// Promote a pattern's severity under a trigger condition. The original
/// pattern is never mutated: the rule publishes a superseding pattern
/// with a new id at the promoted severity.
pub fn escalation_rule(base: &BasePattern, trigger: EscalationTrigger) -> Option<AutoRule> {
    let promoted = match base.severity {
        Severity::High => Severity::Critical,
        Severity::Info => Severity::High,
        Severity::Critical => return None,
    };

    let id = format!("rule-esc-{}", Uuid::new_v4());
    let mut spec = PatternSpec::new(
        &id,
        base.source.clone(),
        format!(
            "エスカレーションルールにより{}に昇格されました (基: {})",
            promoted, base.id
        ),
        promoted,
        base.category,
    );
    spec.anchors = derive_anchors(&spec.source);

    Some(AutoRule {
        id,
        strategy: RuleStrategy::SeverityEscalation,
        derived_from: vec![base.id.clone()],
        spec,
        trigger: Some(trigger),
        created_at: Utc::now(),
    })
}

/// Specialize a pattern to a domain: a domain keyword must appear within
/// a short distance before the base match.
pub fn adaptation_rule(base: &BasePattern, domain: &str) -> Option<AutoRule> {
    let (_, keywords) = DOMAIN_CONTEXTS
        .iter()
        .find(|(name, _)| *name == domain)?;
    let alts = keywords.join("|");
    let source = format!("({alts}).{{0,80}}({})", base.source);

    let id = format!("rule-ctx-{}", Uuid::new_v4());
    let mut spec = PatternSpec::new(
        &id,
        source,
        format!("{domain}ドメイン適応ルールにより検出されました (基: {})", base.id),
        base.severity,
        base.category,
    );
    spec.anchors = derive_anchors(&spec.source);

    Some(AutoRule {
        id,
        strategy: RuleStrategy::ContextAdaptation,
        derived_from: vec![base.id.clone()],
        spec,
        trigger: None,
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn base(severity: Severity) -> BasePattern {
        BasePattern {
            id: "high.bandaid.english".into(),
            source: r"\b(temporary|hack)\b".into(),
            severity,
            category: Category::Maintainability,
        }
    }

    #[test]
    fn test_extension_unions_keywords() {
        let rule = extension_rule(
            &base(Severity::High),
            &["kludge".to_string(), "stopgap".to_string()],
            5,
        )
        .unwrap();
        assert_eq!(rule.strategy, RuleStrategy::PatternExtension);
        assert!(rule.spec.source.contains("kludge|stopgap"));
        assert!(rule.spec.source.contains("temporary"));
        assert_eq!(rule.spec.severity, Severity::High);

        let re = regex::Regex::new(&rule.spec.source).unwrap();
        assert!(re.is_match("a kludge here"));
        assert!(re.is_match("temporary thing"));
    }

    #[test]
    fn test_extension_needs_keywords() {
        assert!(extension_rule(&base(Severity::High), &[], 5).is_none());
    }

    #[test]
    fn test_escalation_promotes_high_to_critical() {
        let rule = escalation_rule(&base(Severity::High), EscalationTrigger::SecurityContext)
            .unwrap();
        assert_eq!(rule.spec.severity, Severity::Critical);
        assert_eq!(rule.trigger, Some(EscalationTrigger::SecurityContext));
        // Superseding pattern, not an in-place change.
        assert_ne!(rule.spec.id, "high.bandaid.english");
        assert_eq!(rule.spec.source, base(Severity::High).source);
    }

    #[test]
    fn test_escalation_caps_at_critical() {
        assert!(
            escalation_rule(&base(Severity::Critical), EscalationTrigger::RepeatedViolations)
                .is_none()
        );
    }

    #[test]
    fn test_adaptation_requires_known_domain() {
        let rule = adaptation_rule(&base(Severity::High), "database").unwrap();
        assert!(rule.spec.source.starts_with("(sql|query|db|connection)"));
        let re = regex::RegexBuilder::new(&rule.spec.source)
            .case_insensitive(true)
            .build()
            .unwrap();
        assert!(re.is_match("query uses a hack somewhere"));
        assert!(!re.is_match("a hack with no domain marker"));

        assert!(adaptation_rule(&base(Severity::High), "blockchain").is_none());
    }
}
