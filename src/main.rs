//! QualityGate CLI runner
//!
//! Host-facing wrapper for editor/shell hooks: reads the candidate content
//! from stdin or a file, runs one `analyze` call, prints a JSON result
//! line on stdout and a human-readable alert on stderr.
//!
//! Exit codes: 0 allow (pass, warn, bypass, and operational errors, which
//! fail open), 2 block (CRITICAL verdict outside warn-only mode).

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use qualitygate::config::EngineConfig;
use qualitygate::models::{AnalyzeMode, Report, Verdict};
use qualitygate::QualityGateEngine;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Edit,
    Bash,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Source {
    Stdin,
    File,
}

#[derive(Debug, Parser)]
#[command(name = "qualitygate", about = "Quality and security gate for edits and commands")]
struct Args {
    /// What kind of payload is being checked
    #[arg(long, value_enum)]
    mode: Mode,

    /// Where the content comes from
    #[arg(long, value_enum, default_value = "stdin")]
    source: Source,

    /// Path to the content when --source=file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Report CRITICAL findings without blocking
    #[arg(long)]
    warn_only: bool,

    /// Soft read timeout in milliseconds. Reserved: stdin reads are
    /// best-effort and have no hard deadline yet.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Optional engine tunables (TOML)
    #[arg(long, env = "QUALITYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Pretty alert output on stderr (also honored via QG_PRETTY)
    #[arg(long)]
    pretty: bool,
}

fn pretty_env() -> bool {
    std::env::var("QG_PRETTY")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qualitygate=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    let pretty = args.pretty || pretty_env();
    let content = match read_content(&args) {
        Ok(content) => content,
        Err(e) => {
            // Operational failure of the wrapper: fail open.
            let report = Report::from_verdict(
                &Verdict::Error {
                    message: format!("{e:#}"),
                },
                args.warn_only,
            );
            emit(&report, pretty);
            return 0;
        }
    };

    let cfg = match &args.config {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };

    let engine = match QualityGateEngine::new(cfg) {
        Ok(engine) => engine,
        Err(e) => {
            let report = Report::from_verdict(
                &Verdict::Error {
                    message: format!("engine unavailable: {e}"),
                },
                args.warn_only,
            );
            emit(&report, pretty);
            return 0;
        }
    };

    let mode = match args.mode {
        Mode::Edit => AnalyzeMode::Edit,
        Mode::Bash => AnalyzeMode::Bash,
    };
    let verdict = engine.analyze(mode, &content);
    let report = Report::from_verdict(&verdict, args.warn_only);
    emit(&report, pretty);

    engine.shutdown();
    report.exit_code()
}

fn read_content(args: &Args) -> Result<String> {
    match args.source {
        Source::Stdin => {
            // Soft timeout only; no hard deadline on stdin reads.
            let _ = args.timeout_ms;
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("failed to read stdin")?;
            Ok(content)
        }
        Source::File => {
            let path = args
                .file
                .as_ref()
                .context("--file is required when --source=file")?;
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))
        }
    }
}

fn emit(report: &Report, pretty: bool) {
    match serde_json::to_string(report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("qualitygate: report serialization failed: {e}"),
    }

    if pretty {
        match report.status {
            "blocked" => {
                eprintln!("🛑🚨 QualityGate CRITICAL detected 🚨🛑");
                if let Some(message) = &report.message {
                    eprintln!("• Detail: {message}");
                }
                if let Some(pattern) = &report.pattern_id {
                    eprintln!("• Pattern: {pattern}");
                }
                eprintln!("Action: Blocked. Please fix and re-run.");
            }
            "passed_with_warnings" => {
                eprintln!("⚠️ QualityGate HIGH warning");
                if let Some(message) = &report.message {
                    eprintln!("• Detail: {message}");
                }
                if let Some(pattern) = &report.pattern_id {
                    eprintln!("• Pattern: {pattern}");
                }
                eprintln!("Action: Allowed (warn). Review recommended.");
            }
            "bypassed" => eprintln!("🔓 QualityGate bypassed by environment flag"),
            _ => {
                if let Some(message) = &report.message {
                    eprintln!("ℹ️ QualityGate: {message}");
                } else {
                    eprintln!("✅ QualityGate: Passed");
                }
            }
        }
    } else if let Some(message) = &report.message {
        let severity = report.severity.unwrap_or("INFO");
        eprintln!("QualityGate {severity}: {message}");
    }
}
