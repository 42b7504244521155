//! Pattern generator
//!
//! Synthesizes candidate patterns from observed inputs and feedback, on a
//! dedicated worker thread fed by a bounded context queue. Soft budgets
//! are enforced by elapsed-time checks between stages; an over-budget
//! attempt discards its partial output. All failures are non-fatal.

use crate::config::GenerationConfig;
use crate::engine::clock::GateClock;
use crate::generation::classifier::{self, Classification};
use crate::generation::rules::{self, AutoRule, BasePattern, EscalationTrigger, RuleStrategy};
use crate::generation::validator::{
    validate_source, ValidationReport, DEFAULT_NEGATIVE_CORPUS, DEFAULT_POSITIVE_CORPUS,
};
use crate::learning::{Learner, WeightAdjust};
use crate::models::{AnalyzeMode, PatternId, Severity};
use crate::patterns::catalog::derive_anchors;
use crate::patterns::{PatternSpec, PatternStore};
use crate::perf::EngineState;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Template bank, selected by context indicators and domain.
const SECURITY_TEMPLATES: [(&str, &str); 4] = [
    (
        "api_key_variants",
        r#"(api[_-]?key|token)[\s=:]+["']?([a-zA-Z0-9]{16,})["']?"#,
    ),
    (
        "api_key_variants",
        r#"(secret[_-]?key|private[_-]?key)[\s=:]+["']?([a-zA-Z0-9]{24,})["']?"#,
    ),
    (
        "command_injection",
        r#"(exec|system|eval|subprocess)\s*\(\s*["']?.*user.*["']?\s*\)"#,
    ),
    ("command_injection", r"(rm|del|delete)\s+.*\$\{.*\}.*"),
];

const QUALITY_TEMPLATES: [(&str, &str); 4] = [
    ("bandaid_fixes", r"(quick[_-]?fix|temp|temporary|hack|workaround)"),
    ("bandaid_fixes", r"(TODO|FIXME|XXX).*(later|tomorrow|next|version)"),
    ("code_smells", r"(magic[_-]?number|hardcoded?|duplicate[_-]?code)"),
    ("code_smells", r"(god[_-]?class|spaghetti[_-]?code|anti[_-]?pattern)"),
];

/// Longest slice of an observed input carried into a context.
const MAX_CONTEXT_CONTENT: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    MatchedInput,
    FalseNegative,
    Manual,
}

/// Input to one generation attempt, produced off the verdict path.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub kind: ContextKind,
    pub content: String,
    pub matched_source: Option<String>,
    pub severity_hint: Option<Severity>,
    pub mode: Option<AnalyzeMode>,
}

impl GenerationContext {
    pub fn matched_input(
        mode: AnalyzeMode,
        content: &str,
        matched_source: &str,
        severity: Severity,
    ) -> Self {
        Self {
            kind: ContextKind::MatchedInput,
            content: truncate_utf8(content, MAX_CONTEXT_CONTENT),
            matched_source: Some(matched_source.to_owned()),
            severity_hint: Some(severity),
            mode: Some(mode),
        }
    }

    pub fn false_negative(missed_content: &str) -> Self {
        Self {
            kind: ContextKind::FalseNegative,
            content: truncate_utf8(missed_content, MAX_CONTEXT_CONTENT),
            matched_source: None,
            severity_hint: Some(Severity::High),
            mode: None,
        }
    }

    pub fn manual(content: &str, severity_hint: Option<Severity>) -> Self {
        Self {
            kind: ContextKind::Manual,
            content: truncate_utf8(content, MAX_CONTEXT_CONTENT),
            matched_source: None,
            severity_hint,
            mode: None,
        }
    }
}

/// A proposed pattern, owned by the generator until publication.
#[derive(Debug, Clone)]
pub struct PatternCandidate {
    pub id: String,
    pub source: String,
    pub message: String,
    pub derived_from: String,
    pub classification: Classification,
    pub validation: ValidationReport,
    pub flagged_for_review: bool,
    pub priority: f64,
}

#[derive(Debug, Default)]
pub struct GenerationStats {
    pub generated: AtomicU64,
    pub published: AtomicU64,
    pub rejected: AtomicU64,
    pub canceled: AtomicU64,
    pub rules_created: AtomicU64,
    pub feedback_events: AtomicU64,
}

pub struct PatternGenerator {
    cfg: GenerationConfig,
    store: Arc<PatternStore>,
    state: Arc<EngineState>,
    learner: Arc<Learner>,
    clock: GateClock,
    queue: ArrayQueue<GenerationContext>,
    review_queue: Mutex<Vec<PatternCandidate>>,
    rules: Mutex<Vec<AutoRule>>,
    stats: GenerationStats,
    shutdown: AtomicBool,
    signaled: AtomicBool,
    worker: OnceLock<std::thread::Thread>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl PatternGenerator {
    pub fn new(
        cfg: GenerationConfig,
        store: Arc<PatternStore>,
        state: Arc<EngineState>,
        learner: Arc<Learner>,
    ) -> Self {
        let queue_cap = cfg.context_queue_capacity.max(1);
        Self {
            cfg,
            store,
            state,
            learner,
            clock: GateClock::new(),
            queue: ArrayQueue::new(queue_cap),
            review_queue: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            stats: GenerationStats::default(),
            shutdown: AtomicBool::new(false),
            signaled: AtomicBool::new(false),
            worker: OnceLock::new(),
            handle: Mutex::new(None),
        }
    }

    /// Called after a CRITICAL/HIGH verdict: queue the context for the
    /// worker. Bounded and lock-free; a full queue drops the oldest.
    #[inline]
    pub fn observe(&self, ctx: GenerationContext) {
        if !self.state.generation_active() {
            return;
        }
        let _ = self.queue.force_push(ctx);
        self.signaled.store(true, Ordering::Release);
        if let Some(thread) = self.worker.get() {
            thread.unpark();
        }
    }

    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let this = Arc::clone(self);
        let joiner = std::thread::Builder::new()
            .name("qg-generator".into())
            .spawn(move || this.run_worker())
            .expect("failed to spawn generator worker");
        *handle = Some(joiner);
    }

    fn run_worker(&self) {
        self.worker
            .set(std::thread::current())
            .expect("worker registered twice");
        info!("pattern generator worker started");

        loop {
            if !self.signaled.swap(false, Ordering::Acquire)
                && !self.shutdown.load(Ordering::Acquire)
            {
                std::thread::park_timeout(Duration::from_millis(50));
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            while let Some(ctx) = self.queue.pop() {
                if self.shutdown.load(Ordering::Acquire) {
                    break;
                }
                self.process_context(ctx);
            }
        }
        info!("pattern generator worker stopped");
    }

    fn process_context(&self, ctx: GenerationContext) {
        if !self.state.generation_active() {
            return;
        }
        let hint = ctx.severity_hint;
        if let Some(candidate) = self.generate(&ctx, hint) {
            let published = self.try_publish(&candidate);
            // A matched input also feeds the extension strategy, using
            // the pattern that fired as the base.
            if published.is_some() {
                if let Some(matched_source) = &ctx.matched_source {
                    if let Some(base_id) = self.find_id_by_source(matched_source) {
                        self.derive_rule(&[base_id.as_str()], RuleStrategy::PatternExtension, &ctx);
                    }
                }
            }
        }
    }

    /// One generation attempt inside the soft budget. Returns `None` on
    /// cancellation or when the context yields nothing usable.
    pub fn generate(
        &self,
        ctx: &GenerationContext,
        severity_hint: Option<Severity>,
    ) -> Option<PatternCandidate> {
        let start = self.clock.raw();
        let budget = self.cfg.generation_budget_us;

        let keywords = extract_keywords(&ctx.content);
        if keywords.is_empty() {
            return None;
        }

        let security = classifier::detect_security_context(&ctx.content);
        let quality = classifier::detect_quality_context(&ctx.content);
        let domain = identify_domain(&ctx.content);
        if self.over_budget(start, budget) {
            self.stats.canceled.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let templates: &[(&str, &str)] = if security {
            &SECURITY_TEMPLATES
        } else if quality {
            &QUALITY_TEMPLATES
        } else if matches!(severity_hint, Some(Severity::Critical) | Some(Severity::High)) {
            &SECURITY_TEMPLATES
        } else {
            &QUALITY_TEMPLATES
        };
        let (template_name, base) = select_template(templates, domain);

        // Keyword-union variant over the base template.
        let alts: Vec<String> = keywords.iter().take(3).map(|k| regex::escape(k)).collect();
        let source = format!("({}|{})", alts.join("|"), base);
        if self.over_budget(start, budget) {
            self.stats.canceled.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Validation: the originating content joins the positive corpus so
        // the candidate must at least detect what spawned it.
        let mut positive: Vec<&str> = DEFAULT_POSITIVE_CORPUS.to_vec();
        positive.push(&ctx.content);
        let validation = validate_source(
            &source,
            &positive,
            &DEFAULT_NEGATIVE_CORPUS,
            self.cfg.lightweight,
        );
        if !validation.compile_ok {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if self.over_budget(start, budget) {
            self.stats.canceled.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let classification = classifier::classify(&source, &ctx.content, severity_hint);
        let flagged = classification.confidence < self.cfg.auto_publish_confidence;
        let priority = calculate_priority(&classification, template_name, domain);

        self.stats.generated.fetch_add(1, Ordering::Relaxed);
        let candidate = PatternCandidate {
            id: format!("gen-{}", Uuid::new_v4()),
            source,
            message: format!("自動生成パターンにより検出されました ({template_name})"),
            derived_from: format!("{:?}:{template_name}", ctx.kind),
            classification,
            validation,
            flagged_for_review: flagged,
            priority,
        };
        debug!(candidate = %candidate.id, template = template_name, flagged,
            "pattern candidate generated");
        Some(candidate)
    }

    /// Publish a validated candidate; flagged or failed candidates go to
    /// the review queue / rejection count instead.
    pub fn try_publish(&self, candidate: &PatternCandidate) -> Option<PatternId> {
        if !candidate.validation.passed {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if candidate.flagged_for_review {
            self.review_queue.lock().push(candidate.clone());
            debug!(candidate = %candidate.id, "candidate flagged for review");
            return None;
        }

        let mut spec = PatternSpec::new(
            &candidate.id,
            &candidate.source,
            &candidate.message,
            candidate.classification.severity,
            candidate.classification.category,
        )
        .with_priority(candidate.priority);
        spec.anchors = derive_anchors(&candidate.source);

        match self.store.publish(&spec) {
            Ok(id) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                Some(id)
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(candidate = %candidate.id, error = %e, "candidate publish failed");
                None
            }
        }
    }

    /// Derive an auto-rule from published base patterns. Pattern identity
    /// crosses this boundary as ids only.
    pub fn derive_rule(
        &self,
        base_ids: &[&str],
        strategy: RuleStrategy,
        ctx: &GenerationContext,
    ) -> Option<AutoRule> {
        let start = self.clock.raw();
        let set = self.store.snapshot();
        let bases: Vec<BasePattern> = base_ids
            .iter()
            .filter_map(|id| set.find(id))
            .map(|p| BasePattern {
                id: p.id.as_str().to_owned(),
                source: p.source.clone(),
                severity: p.severity,
                category: p.category,
            })
            .collect();
        let base = bases.first()?;

        let rule = match strategy {
            RuleStrategy::PatternExtension => {
                let keywords = extract_keywords(&ctx.content);
                rules::extension_rule(base, &keywords, self.cfg.max_variants_per_pattern)
            }
            RuleStrategy::SeverityEscalation => {
                let trigger = if classifier::detect_security_context(&ctx.content) {
                    EscalationTrigger::SecurityContext
                } else {
                    EscalationTrigger::RepeatedViolations
                };
                rules::escalation_rule(base, trigger)
            }
            RuleStrategy::ContextAdaptation => {
                let domain = identify_domain(&ctx.content)?;
                rules::adaptation_rule(base, domain)
            }
        }?;

        if self.clock.elapsed_us(start) > self.cfg.rule_budget_us {
            self.stats.canceled.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Rules publish through the same validation gate as candidates.
        let validation = validate_source(
            &rule.spec.source,
            &[ctx.content.as_str()],
            &DEFAULT_NEGATIVE_CORPUS,
            true,
        );
        if !validation.passed {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if let Err(e) = self.store.publish(&rule.spec) {
            warn!(rule = %rule.id, error = %e, "auto-rule publish failed");
            return None;
        }

        self.stats.rules_created.fetch_add(1, Ordering::Relaxed);
        self.rules.lock().push(rule.clone());
        info!(rule = %rule.id, ?strategy, "auto-rule published");
        Some(rule)
    }

    /// Host feedback entry point.
    pub fn adapt_from_feedback(
        &self,
        pattern_id: &str,
        kind: super::FeedbackKind,
        payload: &str,
    ) -> bool {
        self.stats.feedback_events.fetch_add(1, Ordering::Relaxed);
        let set = self.store.snapshot();
        let Some(pattern) = set.find(pattern_id) else {
            return false;
        };

        match kind {
            super::FeedbackKind::FalsePositive => {
                self.learner.adjust(WeightAdjust {
                    pattern_id: pattern.id.clone(),
                    weight_slot: pattern.weight_slot,
                    factor: super::feedback::FALSE_POSITIVE_ADJUSTMENT,
                });
                true
            }
            super::FeedbackKind::FalseNegative => {
                if payload.trim().is_empty() {
                    return false;
                }
                let ctx = GenerationContext::false_negative(payload);
                match self.generate(&ctx, Some(Severity::High)) {
                    Some(candidate) => {
                        self.try_publish(&candidate);
                        true
                    }
                    None => false,
                }
            }
            super::FeedbackKind::Accuracy => {
                let Ok(accuracy) = payload.trim().parse::<f64>() else {
                    return false;
                };
                let factor = super::feedback::accuracy_adjustment(accuracy);
                self.learner.adjust(WeightAdjust {
                    pattern_id: pattern.id.clone(),
                    weight_slot: pattern.weight_slot,
                    factor,
                });
                true
            }
        }
    }

    fn find_id_by_source(&self, source: &str) -> Option<String> {
        self.store
            .snapshot()
            .iter_all()
            .find(|p| p.source == source)
            .map(|p| p.id.as_str().to_owned())
    }

    #[inline]
    fn over_budget(&self, start: u64, budget_us: u64) -> bool {
        self.clock.elapsed_us(start) > budget_us
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_queue(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn review_queue_len(&self) -> usize {
        self.review_queue.lock().len()
    }

    pub fn rules_created(&self) -> u64 {
        self.stats.rules_created.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &GenerationStats {
        &self.stats
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.worker.get() {
            thread.unpark();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("generator worker panicked during shutdown");
            }
        }
    }
}

/// Alphanumeric words of length ≥3, lowercased, deduplicated in order,
/// capped at 10.
pub fn extract_keywords(content: &str) -> Vec<String> {
    let mut seen = Vec::with_capacity(10);
    let mut current = String::new();
    for c in content.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c.to_ascii_lowercase());
        } else if !current.is_empty() {
            keep_keyword(&mut seen, std::mem::take(&mut current));
            if seen.len() >= 10 {
                return seen;
            }
        }
    }
    if !current.is_empty() {
        keep_keyword(&mut seen, current);
    }
    seen
}

fn keep_keyword(seen: &mut Vec<String>, word: String) {
    if word.len() >= 3
        && word.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && !seen.contains(&word)
    {
        seen.push(word);
    }
}

/// Map content to a domain via keyword presence.
pub fn identify_domain(content: &str) -> Option<&'static str> {
    let lower = content.to_lowercase();
    if ["sql", "database", "query", "db"].iter().any(|k| lower.contains(k)) {
        Some("database")
    } else if ["api", "http", "rest", "endpoint"].iter().any(|k| lower.contains(k)) {
        Some("api")
    } else if ["ui", "frontend", "react", "vue"].iter().any(|k| lower.contains(k)) {
        Some("frontend")
    } else {
        None
    }
}

/// Prefer a template whose name mentions the detected domain, else the
/// first one.
fn select_template<'a>(
    templates: &'a [(&'a str, &'a str)],
    domain: Option<&str>,
) -> (&'a str, &'a str) {
    if let Some(domain) = domain {
        if let Some(found) = templates.iter().find(|(name, _)| name.contains(domain)) {
            return *found;
        }
    }
    templates[0]
}

/// Priority: 0.3·frequency + 0.4·severity + 0.2·context relevance +
/// 0.1·feedback. Frequency and feedback have no history at generation
/// time and use neutral estimates.
fn calculate_priority(
    classification: &Classification,
    template_name: &str,
    domain: Option<&str>,
) -> f64 {
    let frequency: f64 = 0.5;
    let severity = match classification.severity {
        Severity::Critical => 1.0,
        Severity::High => 0.7,
        Severity::Info => 0.3,
    };
    let context_relevance = match (template_name, domain) {
        ("api_key_variants" | "command_injection", Some("api" | "database")) => 0.9,
        ("bandaid_fixes" | "code_smells", _) => 0.6,
        _ => 0.4,
    };
    let feedback = 0.5;
    (0.3 * frequency + 0.4 * severity + 0.2 * context_relevance + 0.1 * feedback).clamp(0.0, 1.0)
}

fn truncate_utf8(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}
