//! Pattern catalogue, compilation, and the lock-free pattern store
//!
//! Patterns are compiled exactly once, at load or publish time. The hot
//! path only ever sees immutable `PatternSet` snapshots behind an
//! `ArcSwap`; a scan observes either the old set or the new set, never a
//! partial state.

pub mod catalog;
pub mod compile;
pub mod store;

pub use catalog::{builtin_catalog, load_catalog_document, PatternSpec};
pub use compile::{compile_spec, CompiledPattern};
pub use store::{PatternSet, PatternStore};

/// Version tag of the scan-view keyword set. Bumped together with the
/// pattern catalogue whenever the keyword list changes.
pub const SCAN_KEYWORDS_VERSION: &str = "kw.v1";

/// Literal keywords the size-bounded scan view windows around. Lowercase;
/// matching is done against a lowercased copy of the input.
pub const SCAN_KEYWORDS: [&str; 18] = [
    "password",
    "api",
    "key",
    "secret",
    "token",
    "sk_",
    "pk_",
    "akia",
    "rm",
    "sudo",
    "eval",
    "exec",
    "とりあえず",
    "todo",
    "fixme",
    "hack",
    "console.log",
    "print",
];

/// True if `anchor` guarantees that any match carries at least one scan
/// keyword, i.e. a window around keyword occurrences cannot miss it.
pub fn anchor_covered_by_keywords(anchor: &str) -> bool {
    let lower = anchor.to_lowercase();
    SCAN_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
