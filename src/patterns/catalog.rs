//! Pattern catalogue
//!
//! The built-in fallback set plus the JSON catalogue document loader.
//! The document is a severity-grouped tree:
//!
//! ```json
//! {
//!   "version": "1.2",
//!   "updated_at": "2025-06-01T00:00:00Z",
//!   "CRITICAL": { "security": { "patterns": { "<regex>": "<message>" } } },
//!   "HIGH": { ... },
//!   "INFO": { ... }
//! }
//! ```

use crate::error::GateError;
use crate::models::{Category, Severity};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// Uncompiled pattern definition, as loaded from the catalogue or produced
/// by the generator.
#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub id: String,
    pub source: String,
    pub message: String,
    pub severity: Severity,
    pub category: Category,
    /// Literal fragments guaranteed to appear in any match (one per
    /// alternation branch). Empty means the pattern must scan full input.
    pub anchors: Vec<String>,
    /// Intra-tier ordering score in [0, 1]; higher scans earlier.
    pub priority: f64,
}

impl PatternSpec {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        category: Category,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            message: message.into(),
            severity,
            category,
            anchors: Vec::new(),
            priority: 0.5,
        }
    }

    pub fn with_anchors(mut self, anchors: &[&str]) -> Self {
        self.anchors = anchors.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority.clamp(0.0, 1.0);
        self
    }
}

/// Pattern ids pinned to the ULTRA_CRITICAL tier. The smallest fixed set
/// of the most dangerous patterns: hard-coded secrets and destructive
/// commands.
pub const ULTRA_PINNED: [&str; 4] = [
    "critical.secrets.api-secret",
    "critical.secrets.aws-access-key",
    "critical.commands.rm-rf-root",
    "critical.commands.sudo-rm-rf",
];

/// Built-in fallback catalogue. Used when no catalogue document can be
/// resolved; always contains the full ULTRA_CRITICAL set.
pub fn builtin_catalog() -> Vec<PatternSpec> {
    use Category::*;
    use Severity::*;

    vec![
        // Hardcoded secrets
        PatternSpec::new(
            "critical.secrets.api-secret",
            r"(sk|pk)_(test|live)_[0-9a-zA-Z]{24,}",
            "ハードコードされたAPIシークレットが検出されました",
            Critical,
            Security,
        )
        .with_anchors(&["sk_", "pk_"])
        .with_priority(1.0),
        PatternSpec::new(
            "critical.secrets.aws-access-key",
            r"AKIA[0-9A-Z]{16}",
            "ハードコードされたAWSアクセスキーIDが検出されました",
            Critical,
            Security,
        )
        .with_anchors(&["akia"])
        .with_priority(1.0),
        PatternSpec::new(
            "critical.secrets.google-api-key",
            r"AIza[0-9A-Za-z\-_]{35}",
            "ハードコードされたGoogle APIキーが検出されました",
            Critical,
            Security,
        ),
        PatternSpec::new(
            "critical.secrets.slack-token",
            r"xox[baprs]-[0-9a-zA-Z-]{10,48}",
            "ハードコードされたSlackトークンが検出されました",
            Critical,
            Security,
        ),
        PatternSpec::new(
            "critical.secrets.github-pat",
            r"ghp_[0-9a-zA-Z]{36}",
            "ハードコードされたGitHubパーソナルアクセストークンが検出されました",
            Critical,
            Security,
        ),
        // Destructive operations
        PatternSpec::new(
            "critical.commands.rm-rf-root",
            r"rm\s+-rf\s+/",
            "危険な再帰的削除コマンドが検出されました",
            Critical,
            Security,
        )
        .with_anchors(&["rm"])
        .with_priority(1.0),
        PatternSpec::new(
            "critical.commands.sudo-rm-rf",
            r"sudo\s+rm\s+-rf",
            "管理者権限での危険な削除コマンドが検出されました",
            Critical,
            Security,
        )
        .with_anchors(&["sudo"])
        .with_priority(1.0),
        PatternSpec::new(
            "critical.commands.drop-database",
            r"DROP\s+DATABASE",
            "直接的なデータベース削除操作が検出されました",
            Critical,
            Reliability,
        ),
        PatternSpec::new(
            "critical.commands.delete-without-filter",
            r"DELETE\s+FROM\s+\w+\s*(;|$)",
            "フィルタなしのDELETE操作が検出されました",
            Critical,
            Reliability,
        ),
        // Injection vectors
        PatternSpec::new(
            "critical.vulnerabilities.eval",
            r"eval\s*\(",
            "直接的なeval()使用が検出されました",
            Critical,
            Security,
        )
        .with_anchors(&["eval"]),
        PatternSpec::new(
            "critical.vulnerabilities.exec",
            r"exec\s*\(",
            "直接的なexec()使用が検出されました",
            Critical,
            Security,
        )
        .with_anchors(&["exec"]),
        PatternSpec::new(
            "critical.vulnerabilities.os-system",
            r"os\.system\s*\(",
            "直接的なos.system()使用が検出されました",
            Critical,
            Security,
        ),
        PatternSpec::new(
            "critical.vulnerabilities.shell-injection",
            r"subprocess\.call\s*\([^)]*shell\s*=\s*True",
            "シェルインジェクション脆弱性が検出されました",
            Critical,
            Security,
        ),
        // Band-aid fixes
        PatternSpec::new(
            "high.bandaid.japanese",
            r"とりあえず|暫定対応|一時的|仮対応",
            "バンドエイド修正の可能性が検出されました",
            High,
            Maintainability,
        ),
        PatternSpec::new(
            "high.bandaid.english",
            r"\b(temporary|temp|quick.?fix|hack|workaround)\b",
            "バンドエイド修正の可能性が検出されました",
            High,
            Maintainability,
        ),
        // Markers without an owner or context
        PatternSpec::new(
            "high.todo.no-context",
            r"\bTODO\b\s*($|[^(\s])",
            "担当者・コンテキストなしのTODOが検出されました",
            High,
            Maintainability,
        )
        .with_anchors(&["todo"]),
        PatternSpec::new(
            "high.todo.fixme-no-context",
            r"\bFIXME\b\s*($|[^(\s])",
            "担当者・コンテキストなしのFIXMEが検出されました",
            High,
            Maintainability,
        )
        .with_anchors(&["fixme"]),
        PatternSpec::new(
            "high.todo.xxx-no-context",
            r"\bXXX\b\s*($|[^(\s])",
            "コンテキストなしのXXXマーカーが検出されました",
            High,
            Maintainability,
        ),
        // Hardcoded endpoints
        PatternSpec::new(
            "high.hardcoded.localhost-url",
            r"localhost:\d{4,5}",
            "ハードコードされたlocalhostURLが検出されました",
            High,
            Reliability,
        ),
        PatternSpec::new(
            "high.hardcoded.localhost-ip",
            r"127\.0\.0\.1:\d{4,5}",
            "ハードコードされたlocalhostIPが検出されました",
            High,
            Reliability,
        ),
        PatternSpec::new(
            "high.hardcoded.production-url",
            r"http://[^/\s]+\.(com|org|net)",
            "ハードコードされた本番URLが検出されました",
            High,
            Reliability,
        ),
        // Swallowed errors
        PatternSpec::new(
            "high.errors.silent-except",
            r"except\s*:\s*pass",
            "サイレント例外処理が検出されました",
            High,
            Reliability,
        ),
        PatternSpec::new(
            "high.errors.empty-catch",
            r"catch\s*\(\s*\)\s*\{",
            "空のcatchブロックが検出されました",
            High,
            Reliability,
        ),
        // Debug leftovers
        PatternSpec::new(
            "info.debug.console-log",
            r"console\.log",
            "デバッグ用console.logが検出されました",
            Info,
            Style,
        )
        .with_anchors(&["console.log"]),
        PatternSpec::new(
            "info.debug.print",
            r"print\s*\(.*debug",
            "デバッグ用print文が検出されました",
            Info,
            Style,
        )
        .with_anchors(&["print"]),
    ]
}

/// Load a catalogue document from disk, converting the severity-grouped
/// tree into flat specs. Document order is preserved so intra-tier
/// tie-breaks stay stable across loads.
pub fn load_catalog_document(path: impl AsRef<Path>) -> Result<Vec<PatternSpec>, GateError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| GateError::Config(format!("cannot read {}: {e}", path.display())))?;
    let doc: Value = serde_json::from_str(&contents)
        .map_err(|e| GateError::Config(format!("malformed catalogue {}: {e}", path.display())))?;

    let root = doc
        .as_object()
        .ok_or_else(|| GateError::Config("catalogue root must be an object".into()))?;

    let version = root
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("unversioned");

    let mut specs = Vec::new();
    for (severity_key, severity) in [
        ("CRITICAL", Severity::Critical),
        ("HIGH", Severity::High),
        ("INFO", Severity::Info),
    ] {
        let Some(groups) = root.get(severity_key).and_then(Value::as_object) else {
            continue;
        };
        for (category_name, block) in groups {
            let category = parse_category(category_name);
            let Some(patterns) = block.get("patterns").and_then(Value::as_object) else {
                warn!(severity = severity_key, category = %category_name,
                    "catalogue category without a patterns table, skipped");
                continue;
            };
            for (source, message) in patterns {
                let Some(message) = message.as_str() else {
                    warn!(regex = %source, "pattern message is not a string, skipped");
                    continue;
                };
                let id = format!(
                    "{}.{}.{:08x}",
                    severity.as_str().to_lowercase(),
                    category.as_str(),
                    fnv1a(source)
                );
                let mut spec =
                    PatternSpec::new(id, source.clone(), message.to_owned(), severity, category);
                spec.anchors = derive_anchors(source);
                specs.push(spec);
            }
        }
    }

    if specs.is_empty() {
        return Err(GateError::Config(format!(
            "catalogue {} (version {version}) defines no patterns",
            path.display()
        )));
    }

    info!(path = %path.display(), version, patterns = specs.len(), "pattern catalogue loaded");
    Ok(specs)
}

/// Guarantee the pinned ULTRA_CRITICAL set is present: an external
/// catalogue can extend the engine but never strip its most dangerous
/// patterns.
pub fn ensure_ultra_set(mut specs: Vec<PatternSpec>) -> Vec<PatternSpec> {
    let builtin = builtin_catalog();
    let mut missing: Vec<PatternSpec> = ULTRA_PINNED
        .iter()
        .filter(|pinned| !specs.iter().any(|s| s.id == **pinned))
        .filter_map(|pinned| builtin.iter().find(|b| b.id == *pinned).cloned())
        .collect();
    if !missing.is_empty() {
        warn!(count = missing.len(), "catalogue missing pinned ultra patterns, restored");
        missing.extend(specs);
        return missing;
    }
    specs
}

fn parse_category(name: &str) -> Category {
    match name.to_ascii_lowercase().as_str() {
        "security" | "secrets" | "dangerous_operations" | "vulnerabilities" => Category::Security,
        "performance" => Category::Performance,
        "maintainability" | "bandaid" | "todos" | "code_smells" => Category::Maintainability,
        "reliability" | "error_handling" | "hardcoded" => Category::Reliability,
        "style" | "debug" => Category::Style,
        _ => Category::General,
    }
}

/// FNV-1a over the regex source; stable across runs so persisted weights
/// keep their identity when the catalogue is reloaded.
fn fnv1a(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Conservative anchor derivation for externally loaded patterns: a
/// literal fragment counts only if every top-level alternation branch
/// carries one. Anything uncertain yields no anchors (full-input scan).
pub fn derive_anchors(source: &str) -> Vec<String> {
    let branches = split_top_level_alternation(source);
    let mut anchors = Vec::with_capacity(branches.len());
    for branch in &branches {
        match longest_literal_run(branch) {
            Some(run) if run.chars().count() >= 2 => anchors.push(run.to_lowercase()),
            _ => return Vec::new(),
        }
    }
    anchors
}

fn split_top_level_alternation(source: &str) -> Vec<String> {
    let mut branches = Vec::new();
    let mut depth = 0usize;
    let mut escaped = false;
    let mut in_class = false;
    let mut current = String::new();
    for c in source.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                current.push(c);
            }
            '[' if !in_class => {
                in_class = true;
                current.push(c);
            }
            ']' if in_class => {
                in_class = false;
                current.push(c);
            }
            '(' if !in_class => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_class => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '|' if depth == 0 && !in_class => {
                branches.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    branches.push(current);
    branches
}

/// Longest literal run at the top level of a branch. Characters inside
/// groups are skipped entirely: a group may contain its own alternation,
/// so nothing inside it is guaranteed to appear in a match.
fn longest_literal_run(branch: &str) -> Option<String> {
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut in_class = false;
    let mut depth = 0usize;
    for c in branch.chars() {
        if escaped {
            // An escape is never a trusted literal; end the run.
            escaped = false;
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' if !in_class => {
                in_class = true;
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            }
            ']' if in_class => in_class = false,
            _ if in_class => {}
            '(' => {
                depth += 1;
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            }
            ')' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            '.' | '+' | '*' | '?' | '{' | '}' | '^' | '$' | '|' => {
                // A quantifier may erase or repeat the preceding char;
                // drop it from the literal run.
                if matches!(c, '?' | '*' | '{') && !current.is_empty() {
                    current.pop();
                }
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs.into_iter().max_by_key(|r| r.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_contains_ultra_set() {
        let specs = builtin_catalog();
        for pinned in ULTRA_PINNED {
            assert!(
                specs.iter().any(|s| s.id == pinned),
                "missing pinned pattern {pinned}"
            );
        }
    }

    #[test]
    fn test_builtin_catalog_ids_unique() {
        let specs = builtin_catalog();
        let mut ids: Vec<_> = specs.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), specs.len());
    }

    #[test]
    fn test_derive_anchors_alternation() {
        // Every branch must carry a literal or the pattern gets none.
        assert_eq!(derive_anchors(r"TODO|FIXME"), vec!["todo", "fixme"]);
        assert!(derive_anchors(r"\d+|TODO").is_empty());
    }

    #[test]
    fn test_derive_anchors_drops_quantified_literal() {
        // 'u' is optional, so the guaranteed run is only "colo".
        assert_eq!(derive_anchors(r"colou?r"), vec!["colo"]);
    }

    #[test]
    fn test_derive_anchors_ignores_group_internals() {
        // "test"/"live" live inside a group alternation; only the "_"
        // separators are top-level, too short to anchor on.
        assert!(derive_anchors(r"(sk|pk)_(test|live)_[0-9a-zA-Z]{24,}").is_empty());
    }

    #[test]
    fn test_load_catalog_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(
            &path,
            r#"{
                "version": "9.9",
                "updated_at": "2026-01-01T00:00:00Z",
                "CRITICAL": {
                    "security": {
                        "patterns": {
                            "AKIA[0-9A-Z]{16}": "aws key",
                            "ghp_[0-9a-zA-Z]{36}": "github pat"
                        }
                    }
                },
                "HIGH": {
                    "bandaid": { "patterns": { "TODO|FIXME": "marker" } }
                }
            }"#,
        )
        .unwrap();

        let specs = load_catalog_document(&path).unwrap();
        assert_eq!(specs.len(), 3);
        assert!(specs[0].id.starts_with("critical.security."));
        assert_eq!(specs[0].severity, Severity::Critical);
        let marker = specs.iter().find(|s| s.message == "marker").unwrap();
        assert_eq!(marker.severity, Severity::High);
        assert_eq!(marker.anchors, vec!["todo", "fixme"]);
    }

    #[test]
    fn test_load_catalog_document_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_catalog_document(&path).is_err());
    }
}
