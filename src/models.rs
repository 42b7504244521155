//! Shared types for the analysis engine
//!
//! Tagged variants for everything that crosses a module boundary:
//! severities, tiers, categories, pattern identity, and the verdict
//! returned to the host. Loose mappings are deliberately absent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Severity classes, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Info,
}

impl Severity {
    /// Weighted-confidence threshold a match must meet to emit a verdict.
    #[inline]
    pub fn threshold(self) -> f64 {
        match self {
            Severity::Critical => 0.8,
            Severity::High => 0.6,
            Severity::Info => 0.4,
        }
    }

    /// Base confidence before the learned weight is applied.
    #[inline]
    pub fn base_confidence(self) -> f64 {
        1.0
    }

    /// Only CRITICAL findings block execution.
    #[inline]
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Info => "INFO",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency class of a pattern. Scanned in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    UltraCritical,
    CriticalFast,
    HighNormal,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::UltraCritical, Tier::CriticalFast, Tier::HighNormal];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Tier::UltraCritical => 0,
            Tier::CriticalFast => 1,
            Tier::HighNormal => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::UltraCritical => "ULTRA_CRITICAL",
            Tier::CriticalFast => "CRITICAL_FAST",
            Tier::HighNormal => "HIGH_NORMAL",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category tag assigned at load or by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Performance,
    Maintainability,
    Reliability,
    Style,
    General,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Maintainability => "maintainability",
            Category::Reliability => "reliability",
            Category::Style => "style",
            Category::General => "general",
        }
    }
}

/// Stable, opaque pattern identity. Never reused; superseding a pattern
/// allocates a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternId(Arc<str>);

impl PatternId {
    pub fn new(id: impl Into<String>) -> Self {
        PatternId(Arc::from(id.into().as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for PatternId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// What kind of payload is being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzeMode {
    Edit,
    Bash,
}

/// Result of one `analyze` call.
///
/// The hot path never raises: every internal failure maps to one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// CRITICAL match at or above threshold. Blocks.
    Block {
        severity: Severity,
        message: String,
        pattern_id: PatternId,
    },
    /// HIGH match at or above threshold. Allowed with a warning.
    Warn {
        severity: Severity,
        message: String,
        pattern_id: PatternId,
    },
    /// Informational match below the blocking thresholds.
    Info {
        severity: Severity,
        message: String,
        pattern_id: PatternId,
    },
    /// No tier produced a sufficient match.
    Pass,
    /// A bypass flag was set; nothing was scanned.
    Bypass,
    /// Empty input.
    NoContent,
    /// Total budget expired before any verdict.
    Timeout,
    /// Operational failure (oversized content, engine unavailable). Fail-open.
    Error { message: String },
}

impl Verdict {
    pub fn status(&self) -> &'static str {
        match self {
            Verdict::Block { .. } => "blocked",
            Verdict::Warn { .. } => "passed_with_warnings",
            Verdict::Info { .. } | Verdict::Pass => "passed",
            Verdict::Bypass => "bypassed",
            Verdict::NoContent => "no_content",
            Verdict::Timeout => "timeout",
            Verdict::Error { .. } => "error",
        }
    }

    #[inline]
    pub fn blocks(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            Verdict::Block { severity, .. }
            | Verdict::Warn { severity, .. }
            | Verdict::Info { severity, .. } => Some(*severity),
            _ => None,
        }
    }

    pub fn pattern_id(&self) -> Option<&PatternId> {
        match self {
            Verdict::Block { pattern_id, .. }
            | Verdict::Warn { pattern_id, .. }
            | Verdict::Info { pattern_id, .. } => Some(pattern_id),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Verdict::Block { message, .. }
            | Verdict::Warn { message, .. }
            | Verdict::Info { message, .. }
            | Verdict::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Wire shape of a verdict for the CLI runner and host hooks.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    pub block: bool,
}

impl Report {
    pub fn from_verdict(verdict: &Verdict, warn_only: bool) -> Self {
        let block = verdict.blocks() && !warn_only;
        Report {
            status: if verdict.blocks() && warn_only {
                "passed_with_warnings"
            } else {
                verdict.status()
            },
            severity: verdict.severity().map(Severity::as_str),
            message: verdict.message().map(str::to_owned),
            pattern_id: verdict.pattern_id().map(|id| id.as_str().to_owned()),
            block,
        }
    }

    /// CLI exit code. 2 blocks, 0 otherwise; operational errors never
    /// surface as policy decisions.
    pub fn exit_code(&self) -> i32 {
        if self.block {
            2
        } else {
            0
        }
    }
}
