//! Candidate validation
//!
//! Three gates before anything reaches the pattern store:
//! 1. compile validation: the regex builds and executes a sample in under 1ms
//! 2. effectiveness: detection rate on a positive corpus (>=0.6, or >=0.3
//!    in lightweight mode)
//! 3. false positives: rate on a negative corpus <=0.2
//!
//! Overall pass = compile ∧ (effectiveness ∨ false-positive acceptable).
//! Every validation produces a report that is recorded on the candidate.

use regex::RegexBuilder;
use serde::Serialize;
use std::time::Instant;

/// Detection-rate floor on the positive corpus.
pub const MIN_DETECTION_RATE: f64 = 0.6;
/// Relaxed floor in lightweight mode.
pub const MIN_DETECTION_RATE_LIGHTWEIGHT: f64 = 0.3;
/// Ceiling on the negative corpus.
pub const MAX_FALSE_POSITIVE_RATE: f64 = 0.2;
/// Sample execution must finish inside this.
pub const MAX_SAMPLE_EXEC_US: u64 = 1000;
/// Generated sources longer than this are rejected outright.
pub const MAX_SOURCE_LEN: usize = 500;

/// Default corpora for candidates generated without an originating input.
pub const DEFAULT_POSITIVE_CORPUS: [&str; 3] =
    ["password=123456", "TODO: fix this later", "rm -rf /"];
pub const DEFAULT_NEGATIVE_CORPUS: [&str; 3] = [
    "const api_version = '1.0'",
    "let names = load_names()",
    "mkdir /tmp/test",
];

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub compile_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<String>,
    pub sample_exec_us: u64,
    pub performance_ok: bool,
    pub detection_rate: f64,
    pub effectiveness_ok: bool,
    pub false_positive_rate: f64,
    pub false_positive_ok: bool,
    pub passed: bool,
}

impl ValidationReport {
    fn failed_compile(error: String) -> Self {
        Self {
            compile_ok: false,
            compile_error: Some(error),
            sample_exec_us: 0,
            performance_ok: false,
            detection_rate: 0.0,
            effectiveness_ok: false,
            false_positive_rate: 1.0,
            false_positive_ok: false,
            passed: false,
        }
    }
}

/// Validate a candidate regex source against the given corpora.
pub fn validate_source(
    source: &str,
    positive: &[&str],
    negative: &[&str],
    lightweight: bool,
) -> ValidationReport {
    if source.len() > MAX_SOURCE_LEN {
        return ValidationReport::failed_compile(format!(
            "source length {} exceeds {MAX_SOURCE_LEN}",
            source.len()
        ));
    }

    let regex = match RegexBuilder::new(source)
        .case_insensitive(true)
        .multi_line(true)
        .size_limit(1 << 20)
        .build()
    {
        Ok(regex) => regex,
        Err(e) => return ValidationReport::failed_compile(e.to_string()),
    };

    let exec_start = Instant::now();
    let _ = regex.is_match("sample text for performance validation");
    let sample_exec_us = exec_start.elapsed().as_micros() as u64;
    let performance_ok = sample_exec_us <= MAX_SAMPLE_EXEC_US;

    let detection_rate = if positive.is_empty() {
        0.0
    } else {
        let hits = positive.iter().filter(|case| regex.is_match(case)).count();
        hits as f64 / positive.len() as f64
    };
    let floor = if lightweight {
        MIN_DETECTION_RATE_LIGHTWEIGHT
    } else {
        MIN_DETECTION_RATE
    };
    let effectiveness_ok = detection_rate >= floor;

    let false_positive_rate = if negative.is_empty() {
        0.0
    } else {
        let hits = negative.iter().filter(|case| regex.is_match(case)).count();
        hits as f64 / negative.len() as f64
    };
    let false_positive_ok = false_positive_rate <= MAX_FALSE_POSITIVE_RATE;

    let passed = performance_ok && (effectiveness_ok || false_positive_ok);

    ValidationReport {
        compile_ok: true,
        compile_error: None,
        sample_exec_us,
        performance_ok,
        detection_rate,
        effectiveness_ok,
        false_positive_rate,
        false_positive_ok,
        passed,
    }
}
