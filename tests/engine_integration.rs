//! End-to-end engine scenarios
//!
//! Exercises the public surface the way the CLI runner and host hooks do:
//! literal known-bad inputs, warn-level quality findings, bypass flags,
//! learning round-trips, and recovery convergence.

use parking_lot::Mutex;
use qualitygate::config::EngineConfig;
use qualitygate::generation::FeedbackKind;
use qualitygate::models::{AnalyzeMode, Report, Severity, Verdict};
use qualitygate::patterns::builtin_catalog;
use qualitygate::perf::RecoveryTrigger;
use qualitygate::QualityGateEngine;

/// `analyze` consults the bypass environment on every call; tests that
/// touch env vars serialize through this.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn quiet_engine() -> QualityGateEngine {
    let mut cfg = EngineConfig::default();
    cfg.learning.enabled = false;
    cfg.generation.enabled = false;
    QualityGateEngine::with_patterns(cfg, builtin_catalog(), None).unwrap()
}

#[test]
fn test_reference_scenarios() {
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let engine = quiet_engine();

    // Hardcoded API secret: blocked, CRITICAL, exit 2.
    let verdict = engine.analyze(
        AnalyzeMode::Edit,
        "sk_test_1234567890abcdef1234567890abcdef",
    );
    assert_eq!(verdict.status(), "blocked");
    assert_eq!(verdict.severity(), Some(Severity::Critical));
    assert!(verdict.message().unwrap().contains("APIシークレット"));
    let report = Report::from_verdict(&verdict, false);
    assert_eq!(report.exit_code(), 2);
    assert!(report.block);

    // AWS access key id.
    let verdict = engine.analyze(AnalyzeMode::Edit, "AKIA1234567890ABCDEF");
    assert_eq!(verdict.status(), "blocked");
    assert_eq!(verdict.severity(), Some(Severity::Critical));

    // Destructive command.
    let verdict = engine.analyze(AnalyzeMode::Bash, "sudo rm -rf /");
    assert_eq!(verdict.status(), "blocked");

    // Band-aid marker: warn, allowed, exit 0.
    let verdict = engine.analyze(AnalyzeMode::Edit, "とりあえずこれで修正");
    assert_eq!(verdict.status(), "passed_with_warnings");
    assert_eq!(verdict.severity(), Some(Severity::High));
    assert_eq!(Report::from_verdict(&verdict, false).exit_code(), 0);

    // Debug leftover: informational, exit 0.
    let verdict = engine.analyze(AnalyzeMode::Edit, "console.log('debug')");
    assert_eq!(verdict.status(), "passed");
    assert_eq!(Report::from_verdict(&verdict, false).exit_code(), 0);

    // Clean code: passed, no severity.
    let verdict = engine.analyze(AnalyzeMode::Edit, "const total = sum(items)");
    assert_eq!(verdict.status(), "passed");
    assert_eq!(verdict.severity(), None);
}

#[test]
fn test_bypass_flag_short_circuits() {
    let _guard = ENV_LOCK.lock();
    let engine = quiet_engine();

    std::env::set_var("QUALITYGATE_DISABLED", "1");
    let verdict = engine.analyze(
        AnalyzeMode::Edit,
        "sk_test_1234567890abcdef1234567890abcdef",
    );
    std::env::remove_var("QUALITYGATE_DISABLED");

    assert_eq!(verdict, Verdict::Bypass);
    assert_eq!(verdict.status(), "bypassed");
    assert_eq!(Report::from_verdict(&verdict, false).exit_code(), 0);
    // Nothing was scanned or recorded as a call.
    assert_eq!(engine.metrics().calls(), 0);
    assert_eq!(engine.metrics().snapshot().bypasses, 1);
}

#[test]
fn test_warn_only_never_blocks() {
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let engine = quiet_engine();
    let verdict = engine.analyze(AnalyzeMode::Bash, "rm -rf / --no-preserve-root");
    assert!(verdict.blocks());
    let report = Report::from_verdict(&verdict, true);
    assert_eq!(report.status, "passed_with_warnings");
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_learning_weight_persistence_round_trip() {
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let dir = tempfile::tempdir().unwrap();
    let weights_path = dir.path().join("state").join("weights.json");

    let first_weight;
    let matched_id;
    {
        let mut cfg = EngineConfig::default();
        cfg.generation.enabled = false;
        let engine = QualityGateEngine::with_patterns(
            cfg,
            builtin_catalog(),
            Some(weights_path.clone()),
        )
        .unwrap();

        // Repeated CRITICAL matches feed the learner (confidence 1.0 is
        // above the ULTRA floor of 0.95).
        let verdict = engine.analyze(AnalyzeMode::Bash, "sudo rm -rf /");
        assert!(verdict.blocks());
        matched_id = verdict.pattern_id().unwrap().as_str().to_owned();
        for _ in 0..20 {
            let verdict = engine.analyze(AnalyzeMode::Bash, "sudo rm -rf /");
            assert!(verdict.blocks());
        }
        for _ in 0..100 {
            if engine.learner().processed() > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(engine.learner().processed() > 0, "worker applied no updates");
        engine.shutdown();

        let set = engine.store().snapshot();
        let slot = set.find(&matched_id).unwrap().weight_slot;
        first_weight = engine.weights().get(slot);
        assert!(first_weight > 0.0 && first_weight <= 1.0);
        assert!(engine.weights().last_updated_us(slot) > 0);
    }

    assert!(weights_path.exists(), "weights not persisted on shutdown");

    // A fresh engine restores the persisted weights.
    let mut cfg = EngineConfig::default();
    cfg.learning.enabled = false;
    cfg.generation.enabled = false;
    let engine =
        QualityGateEngine::with_patterns(cfg, builtin_catalog(), Some(weights_path)).unwrap();
    let set = engine.store().snapshot();
    let slot = set.find(&matched_id).unwrap().weight_slot;
    assert!((engine.weights().get(slot) - first_weight).abs() < 1e-6);
    assert!(engine.weights().last_updated_us(slot) > 0);
}

#[test]
fn test_recovery_converges_to_stability_mode() {
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let engine = quiet_engine();

    for _ in 0..4 {
        engine.recovery().notify(RecoveryTrigger::TimeoutViolation);
    }
    assert!(engine.state().stability_mode());

    // Degraded but still correct: the ultra set keeps blocking.
    let verdict = engine.analyze(AnalyzeMode::Edit, "AKIA1234567890ABCDEF");
    assert!(verdict.blocks());

    // No automatic re-enablement.
    engine.recovery().notify(RecoveryTrigger::MemoryOverflow);
    assert!(engine.state().stability_mode());

    engine.reset_stability();
    assert!(!engine.state().stability_mode());
    let verdict = engine.analyze(AnalyzeMode::Edit, "とりあえず仮対応");
    assert_eq!(verdict.status(), "passed_with_warnings");
}

#[test]
fn test_catalogue_document_via_env_override() {
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patterns.json");
    std::fs::write(
        &path,
        r#"{
            "version": "test.1",
            "updated_at": "2026-08-01T00:00:00Z",
            "HIGH": {
                "reliability": {
                    "patterns": {
                        "forbidden_legacy_call": "legacy call detected"
                    }
                }
            }
        }"#,
    )
    .unwrap();

    std::env::set_var("QUALITYGATE_PATTERNS", &path);
    let mut cfg = EngineConfig::default();
    cfg.learning.enabled = false;
    cfg.generation.enabled = false;
    let engine = QualityGateEngine::new(cfg).unwrap();
    std::env::remove_var("QUALITYGATE_PATTERNS");

    // Document pattern is live.
    let verdict = engine.analyze(AnalyzeMode::Edit, "x = forbidden_legacy_call()");
    assert_eq!(verdict.status(), "passed_with_warnings");
    assert!(verdict.message().unwrap().contains("legacy call"));

    // The pinned ultra set is restored even though the document lacks it.
    let verdict = engine.analyze(AnalyzeMode::Edit, "AKIA1234567890ABCDEF");
    assert!(verdict.blocks());
}

#[test]
fn test_feedback_false_positive_lowers_confidence() {
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let mut cfg = EngineConfig::default();
    cfg.generation.enabled = false;
    let engine = QualityGateEngine::with_patterns(cfg, builtin_catalog(), None).unwrap();

    let set = engine.store().snapshot();
    let slot = set.find("high.bandaid.japanese").unwrap().weight_slot;
    let before = engine.weights().get(slot);

    assert!(engine.adapt_from_feedback("high.bandaid.japanese", FeedbackKind::FalsePositive, ""));
    for _ in 0..100 {
        if engine.weights().get(slot) < before {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(engine.weights().get(slot) < before);
    engine.shutdown();
}

#[test]
fn test_published_patterns_visible_to_later_calls() {
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let engine = quiet_engine();

    let verdict = engine.analyze(AnalyzeMode::Edit, "call deprecated_payment_api now");
    assert_eq!(verdict.status(), "passed");

    let spec = qualitygate::patterns::PatternSpec::new(
        "high.custom.deprecated-payment",
        r"deprecated_payment_api",
        "deprecated payment API referenced",
        Severity::High,
        qualitygate::models::Category::Reliability,
    );
    engine.store().publish(&spec).unwrap();

    let verdict = engine.analyze(AnalyzeMode::Edit, "call deprecated_payment_api now");
    assert_eq!(verdict.status(), "passed_with_warnings");
}

#[test]
fn test_latency_within_relaxed_budget() {
    // Budget discipline, with generous tolerance for debug builds and
    // noisy CI machines: the engine targets p99 within 2x of the 1.5ms
    // budget on release hardware; here we only guard against gross
    // regressions (10ms mean).
    let _guard = ENV_LOCK.lock();
    std::env::remove_var("QUALITYGATE_DISABLED");
    let engine = quiet_engine();

    let inputs = [
        "const total = sum(items)",
        "sudo rm -rf /",
        "とりあえずこれで修正",
        "console.log('debug')",
    ];
    let start = std::time::Instant::now();
    let mut calls = 0u32;
    for _ in 0..50 {
        for input in inputs {
            let _ = engine.analyze(AnalyzeMode::Edit, input);
            calls += 1;
        }
    }
    let mean_us = start.elapsed().as_micros() as f64 / calls as f64;
    assert!(mean_us < 10_000.0, "mean latency {mean_us}us is out of band");
}
