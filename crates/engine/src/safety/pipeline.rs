//! Bounded-latency safety validation pipeline.
//!
//! Given one content unit, produces exactly one ValidationResult within a
//! hard deadline. The three checks (rule filter, bias scanner, crisis
//! scanner) run concurrently; all must pass for an aggregate pass, the first
//! failure wins, and a crisis verdict beats everything. On deadline expiry
//! the pipeline falls back to the rule filter's completed verdict if it has
//! one, else fails closed. A crisis check still in flight at the deadline is
//! never truncated: it continues detached and a late firing is routed to the
//! crisis channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use solace_domain::{
    AuditRecord, ContentUnit, CrisisAssessment, EngineEvent, SafetyScore, SessionId, ValidationId,
    ValidationResult,
};

use crate::config::SafetyConfig;
use crate::infrastructure::circuit_breaker::{BreakerConfig, RollingBreaker};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::ports::{
    AuditSink, CheckError, CheckKind, CheckReport, ClockPort, ContentCheckPort,
};

/// Everything one validation call produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub result: ValidationResult,
    /// Minimum safety score across the completed rule/bias reports; feeds the
    /// choice processor's tie-break.
    pub safety_score: SafetyScore,
    pub crisis: Option<CrisisAssessment>,
    /// Fail-closed with no rule verdict available. Counts toward the
    /// session's hard-failure budget.
    pub hard_failure: bool,
}

impl PipelineOutcome {
    pub fn passed(&self) -> bool {
        self.result.passed
    }
}

enum CheckSlot {
    Pending,
    Skipped,
    Errored,
    Report(CheckReport),
}

impl CheckSlot {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    fn report(&self) -> Option<&CheckReport> {
        match self {
            Self::Report(report) => Some(report),
            _ => None,
        }
    }
}

/// The multi-check gate every outbound content unit and inbound choice must
/// pass.
pub struct SafetyPipeline {
    rule: Arc<dyn ContentCheckPort>,
    bias: Arc<dyn ContentCheckPort>,
    crisis: Arc<dyn ContentCheckPort>,
    bias_breaker: Arc<RollingBreaker>,
    crisis_breaker: Arc<RollingBreaker>,
    audit: Arc<dyn AuditSink>,
    bus: Arc<EventBus>,
    clock: Arc<dyn ClockPort>,
    config: SafetyConfig,
    /// Late crisis firings (after the deadline returned a fallback result)
    /// are delivered here for out-of-band escalation.
    late_crisis_tx: mpsc::UnboundedSender<CrisisAssessment>,
}

impl SafetyPipeline {
    pub fn new(
        rule: Arc<dyn ContentCheckPort>,
        bias: Arc<dyn ContentCheckPort>,
        crisis: Arc<dyn ContentCheckPort>,
        breaker_config: BreakerConfig,
        audit: Arc<dyn AuditSink>,
        bus: Arc<EventBus>,
        clock: Arc<dyn ClockPort>,
        config: SafetyConfig,
        late_crisis_tx: mpsc::UnboundedSender<CrisisAssessment>,
    ) -> Self {
        Self {
            rule,
            bias,
            crisis,
            bias_breaker: Arc::new(RollingBreaker::new("bias_scanner", breaker_config.clone())),
            crisis_breaker: Arc::new(RollingBreaker::new("crisis_scanner", breaker_config)),
            audit,
            bus,
            clock,
            config,
            late_crisis_tx,
        }
    }

    /// Validates one content unit with the configured deadline.
    pub async fn validate(&self, session_id: SessionId, content: &ContentUnit) -> PipelineOutcome {
        self.validate_with_deadline(session_id, content, self.config.validation_deadline())
            .await
    }

    /// Validates one content unit with an explicit deadline.
    pub async fn validate_with_deadline(
        &self,
        session_id: SessionId,
        content: &ContentUnit,
        deadline: Duration,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let subject_id = content.id;

        let mut rule_task = Some(spawn_check(self.rule.clone(), content.clone()));
        let mut rule_slot = CheckSlot::Pending;

        // Classifier backends behind tripped breakers are skipped entirely:
        // degraded mode, rule-only, every result flagged fallback_used.
        let (bias_task, mut bias_slot) = if self.bias_breaker.allow_request() {
            (Some(spawn_check(self.bias.clone(), content.clone())), CheckSlot::Pending)
        } else {
            tracing::warn!(
                session_id = %session_id,
                "Bias scanner breaker open; validating in degraded mode"
            );
            (None, CheckSlot::Skipped)
        };
        let (crisis_task, mut crisis_slot) = if self.crisis_breaker.allow_request() {
            (
                Some(spawn_check(self.crisis.clone(), content.clone())),
                CheckSlot::Pending,
            )
        } else {
            tracing::warn!(
                session_id = %session_id,
                "Crisis scanner breaker open; validating in degraded mode"
            );
            (None, CheckSlot::Skipped)
        };

        let mut bias_task = bias_task;
        let mut crisis_task = crisis_task;

        let deadline_sleep = tokio::time::sleep(deadline);
        tokio::pin!(deadline_sleep);

        let outcome = loop {
            // Crisis wins over everything; short-circuit on any completed
            // check that settles the aggregate.
            if let Some(report) = crisis_slot.report() {
                if report.confidence.value() >= self.config.crisis_threshold {
                    let report = report.clone();
                    abort_if_pending(&mut rule_task, &rule_slot);
                    abort_if_pending(&mut bias_task, &bias_slot);
                    break self.crisis_outcome(session_id, subject_id, report, started);
                }
            }
            if let Some(report) = rule_slot.report() {
                if report.score.value() < self.config.check_floor {
                    let report = report.clone();
                    abort_if_pending(&mut bias_task, &bias_slot);
                    self.detach_crisis_watchdog(session_id, crisis_task.take(), &crisis_slot);
                    break self.failed_outcome(subject_id, report, started, false);
                }
            }
            if let Some(report) = bias_slot.report() {
                if report.score.value() < self.config.check_floor {
                    let report = report.clone();
                    abort_if_pending(&mut rule_task, &rule_slot);
                    self.detach_crisis_watchdog(session_id, crisis_task.take(), &crisis_slot);
                    break self.failed_outcome(subject_id, report, started, false);
                }
            }
            if !rule_slot.is_pending() && !bias_slot.is_pending() && !crisis_slot.is_pending() {
                break self.aggregate_outcome(subject_id, &rule_slot, &bias_slot, &crisis_slot, started);
            }

            tokio::select! {
                biased;

                joined = poll_opt(&mut rule_task), if rule_slot.is_pending() => {
                    rule_slot = settle(CheckKind::RuleFilter, joined, None);
                }
                joined = poll_opt(&mut crisis_task), if crisis_slot.is_pending() => {
                    crisis_slot = settle(
                        CheckKind::CrisisScanner,
                        joined,
                        Some(self.crisis_breaker.as_ref()),
                    );
                }
                joined = poll_opt(&mut bias_task), if bias_slot.is_pending() => {
                    bias_slot = settle(CheckKind::BiasScanner, joined, Some(self.bias_breaker.as_ref()));
                }
                _ = &mut deadline_sleep => {
                    abort_if_pending(&mut rule_task, &rule_slot);
                    abort_if_pending(&mut bias_task, &bias_slot);
                    self.detach_crisis_watchdog(session_id, crisis_task.take(), &crisis_slot);
                    break self.deadline_outcome(session_id, subject_id, &rule_slot, started, deadline);
                }
            }
        };

        self.audit
            .append(AuditRecord::Validation(outcome.result.clone()))
            .await;
        if let Some(assessment) = &outcome.crisis {
            self.audit.append(AuditRecord::Crisis(assessment.clone())).await;
        }
        self.bus.publish(EngineEvent::ValidationCompleted {
            session_id,
            validation_id: outcome.result.id,
            passed: outcome.result.passed,
            fallback_used: outcome.result.fallback_used,
            at: outcome.result.completed_at,
        });
        outcome
    }

    fn crisis_outcome(
        &self,
        session_id: SessionId,
        subject_id: solace_domain::ContentId,
        report: CheckReport,
        started: Instant,
    ) -> PipelineOutcome {
        let severity = self.config.severity_for_score(report.score.value());
        tracing::warn!(
            session_id = %session_id,
            severity = %severity,
            confidence = %report.confidence,
            "Crisis indicators detected; blocking content and escalating"
        );
        let assessment = CrisisAssessment::detected(
            session_id,
            severity,
            report.triggered_rules.clone(),
            report.confidence,
            self.clock.now(),
        )
        .with_recommended_actions(vec![
            "provide_crisis_resources".into(),
            "restrict_choice_types".into(),
            "await_human_resolution".into(),
        ]);

        let mut triggered = report.triggered_rules;
        triggered.push(format!("crisis_indicator:{severity}"));
        let result = ValidationResult {
            id: ValidationId::new(),
            subject_id,
            passed: false,
            confidence: report.confidence,
            triggered_rules: triggered,
            elapsed: started.elapsed(),
            fallback_used: false,
            deadline_expired: false,
            completed_at: self.clock.now(),
        };
        PipelineOutcome {
            result,
            safety_score: SafetyScore::ZERO,
            crisis: Some(assessment),
            hard_failure: false,
        }
    }

    fn failed_outcome(
        &self,
        subject_id: solace_domain::ContentId,
        report: CheckReport,
        started: Instant,
        fallback_used: bool,
    ) -> PipelineOutcome {
        tracing::info!(
            check = %report.kind,
            score = %report.score,
            "Safety check failed; blocking content"
        );
        let result = ValidationResult {
            id: ValidationId::new(),
            subject_id,
            passed: false,
            confidence: report.confidence,
            triggered_rules: report.triggered_rules.clone(),
            elapsed: started.elapsed(),
            fallback_used,
            deadline_expired: false,
            completed_at: self.clock.now(),
        };
        PipelineOutcome {
            result,
            safety_score: report.score,
            crisis: None,
            hard_failure: false,
        }
    }

    fn aggregate_outcome(
        &self,
        subject_id: solace_domain::ContentId,
        rule: &CheckSlot,
        bias: &CheckSlot,
        crisis: &CheckSlot,
        started: Instant,
    ) -> PipelineOutcome {
        let Some(rule_report) = rule.report() else {
            // The rule filter itself is unavailable: nothing to fall back to.
            tracing::error!("Rule filter unavailable; failing closed with no fallback verdict");
            let result = ValidationResult::blocked(
                subject_id,
                vec!["rule_filter_unavailable".into()],
                started.elapsed(),
                false,
                self.clock.now(),
            );
            return PipelineOutcome {
                result,
                safety_score: SafetyScore::ZERO,
                crisis: None,
                hard_failure: true,
            };
        };

        let degraded = !matches!(bias, CheckSlot::Report(_)) || !matches!(crisis, CheckSlot::Report(_));
        let mut triggered = rule_report.triggered_rules.clone();
        let mut confidence = rule_report.confidence;
        let mut safety_score = rule_report.score;
        if let Some(bias_report) = bias.report() {
            triggered.extend(bias_report.triggered_rules.iter().cloned());
            if bias_report.confidence < confidence {
                confidence = bias_report.confidence;
            }
            if bias_report.score < safety_score {
                safety_score = bias_report.score;
            }
        }

        let result = ValidationResult {
            id: ValidationId::new(),
            subject_id,
            passed: true,
            confidence,
            triggered_rules: triggered,
            elapsed: started.elapsed(),
            fallback_used: degraded,
            deadline_expired: false,
            completed_at: self.clock.now(),
        };
        PipelineOutcome {
            result,
            safety_score,
            crisis: None,
            hard_failure: false,
        }
    }

    fn deadline_outcome(
        &self,
        session_id: SessionId,
        subject_id: solace_domain::ContentId,
        rule: &CheckSlot,
        started: Instant,
        deadline: Duration,
    ) -> PipelineOutcome {
        tracing::warn!(
            session_id = %session_id,
            deadline_ms = deadline.as_millis() as u64,
            "Validation deadline expired; taking fallback path"
        );
        match rule.report() {
            Some(report) => {
                let passed = report.score.value() >= self.config.check_floor;
                let result = ValidationResult {
                    id: ValidationId::new(),
                    subject_id,
                    passed,
                    confidence: report.confidence,
                    triggered_rules: report.triggered_rules.clone(),
                    elapsed: started.elapsed(),
                    fallback_used: true,
                    deadline_expired: true,
                    completed_at: self.clock.now(),
                };
                PipelineOutcome {
                    result,
                    safety_score: report.score,
                    crisis: None,
                    hard_failure: false,
                }
            }
            None => {
                let result = ValidationResult::blocked(
                    subject_id,
                    vec!["validation_timeout".into()],
                    started.elapsed(),
                    true,
                    self.clock.now(),
                );
                PipelineOutcome {
                    result,
                    safety_score: SafetyScore::ZERO,
                    crisis: None,
                    hard_failure: true,
                }
            }
        }
    }

    /// Lets an in-flight crisis check run to completion after the pipeline
    /// has already returned. A late firing is audited and escalated through
    /// the crisis channel; it is never dropped.
    fn detach_crisis_watchdog(
        &self,
        session_id: SessionId,
        task: Option<JoinHandle<Result<CheckReport, CheckError>>>,
        slot: &CheckSlot,
    ) {
        let Some(task) = task else { return };
        if !slot.is_pending() {
            task.abort();
            return;
        }
        let safety = self.config.clone();
        let audit = self.audit.clone();
        let breaker = self.crisis_breaker.clone();
        let tx = self.late_crisis_tx.clone();
        tokio::spawn(async move {
            let report = match task.await {
                Ok(Ok(report)) => {
                    breaker.record_success();
                    report
                }
                Ok(Err(e)) => {
                    breaker.record_failure();
                    tracing::warn!(session_id = %session_id, error = %e, "Detached crisis check failed");
                    return;
                }
                Err(_) => return,
            };
            if report.confidence.value() < safety.crisis_threshold {
                return;
            }
            let severity = safety.severity_for_score(report.score.value());
            tracing::warn!(
                session_id = %session_id,
                severity = %severity,
                "Crisis check fired after pipeline deadline; escalating late"
            );
            let assessment = CrisisAssessment::detected(
                session_id,
                severity,
                report.triggered_rules,
                report.confidence,
                chrono::Utc::now(),
            )
            .with_recommended_actions(vec![
                "provide_crisis_resources".into(),
                "restrict_choice_types".into(),
                "await_human_resolution".into(),
            ]);
            audit.append(AuditRecord::Crisis(assessment.clone())).await;
            if tx.send(assessment).is_err() {
                tracing::error!(session_id = %session_id, "Late crisis channel closed; escalation lost");
            }
        });
    }
}

fn spawn_check(
    port: Arc<dyn ContentCheckPort>,
    content: ContentUnit,
) -> JoinHandle<Result<CheckReport, CheckError>> {
    tokio::spawn(async move { port.check(&content).await })
}

async fn poll_opt(
    task: &mut Option<JoinHandle<Result<CheckReport, CheckError>>>,
) -> Result<Result<CheckReport, CheckError>, tokio::task::JoinError> {
    match task {
        Some(handle) => handle.await,
        // Guarded by the slot's pending flag; an absent task never gets here.
        None => futures_util::future::pending().await,
    }
}

fn settle(
    kind: CheckKind,
    joined: Result<Result<CheckReport, CheckError>, tokio::task::JoinError>,
    breaker: Option<&RollingBreaker>,
) -> CheckSlot {
    match joined {
        Ok(Ok(report)) => {
            if let Some(breaker) = breaker {
                breaker.record_success();
            }
            CheckSlot::Report(report)
        }
        Ok(Err(e)) => {
            if let Some(breaker) = breaker {
                breaker.record_failure();
            }
            tracing::warn!(check = %kind, error = %e, "Safety check errored");
            CheckSlot::Errored
        }
        Err(join_err) => {
            if let Some(breaker) = breaker {
                breaker.record_failure();
            }
            tracing::error!(check = %kind, error = %join_err, "Safety check task failed");
            CheckSlot::Errored
        }
    }
}

fn abort_if_pending(
    task: &mut Option<JoinHandle<Result<CheckReport, CheckError>>>,
    slot: &CheckSlot,
) {
    if slot.is_pending() {
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::InMemoryAuditSink;
    use crate::testing::{StubCheck, SystemClockForTests};
    use solace_domain::{ContentSource, CrisisSeverity};

    fn content() -> ContentUnit {
        ContentUnit::new(ContentSource::Generator, "the path winds through tall grass")
    }

    fn pipeline_with(
        rule: StubCheck,
        bias: StubCheck,
        crisis: StubCheck,
        config: SafetyConfig,
    ) -> (SafetyPipeline, Arc<InMemoryAuditSink>, mpsc::UnboundedReceiver<CrisisAssessment>) {
        let audit = Arc::new(InMemoryAuditSink::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = SafetyPipeline::new(
            Arc::new(rule),
            Arc::new(bias),
            Arc::new(crisis),
            BreakerConfig::default(),
            audit.clone(),
            Arc::new(EventBus::default()),
            Arc::new(SystemClockForTests),
            config,
            tx,
        );
        (pipeline, audit, rx)
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let (pipeline, audit, _rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::clean(CheckKind::BiasScanner),
            StubCheck::clean(CheckKind::CrisisScanner).with_confidence(0.1),
            SafetyConfig::default(),
        );
        let outcome = pipeline.validate(SessionId::new(), &content()).await;
        assert!(outcome.passed());
        assert!(!outcome.result.fallback_used);
        assert!(outcome.crisis.is_none());
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn test_first_failure_wins_on_bias_fail() {
        let (pipeline, _audit, _rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::flagged(CheckKind::BiasScanner, 0.2, vec!["stereotype_language".into()]),
            StubCheck::clean(CheckKind::CrisisScanner).with_confidence(0.1),
            SafetyConfig::default(),
        );
        let outcome = pipeline.validate(SessionId::new(), &content()).await;
        assert!(!outcome.passed());
        assert!(outcome
            .result
            .triggered_rules
            .contains(&"stereotype_language".to_string()));
        assert!(outcome.crisis.is_none());
    }

    #[tokio::test]
    async fn test_crisis_beats_conflicting_outcomes() {
        // Rule passes, bias fails, crisis fires: crisis wins.
        let (pipeline, audit, _rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::flagged(CheckKind::BiasScanner, 0.2, vec!["bias".into()]).with_delay(20),
            StubCheck::crisis_firing(0.9, 0.95, vec!["self_harm_language".into()]),
            SafetyConfig::default(),
        );
        let outcome = pipeline.validate(SessionId::new(), &content()).await;
        assert!(!outcome.passed());
        let assessment = outcome.crisis.expect("crisis assessment");
        assert_eq!(assessment.severity, CrisisSeverity::Severe);
        // Both the validation and the assessment were audited.
        assert_eq!(audit.len(), 2);
    }

    #[tokio::test]
    async fn test_severity_bands_are_configurable() {
        let config = SafetyConfig {
            severity_severe_floor: 0.5,
            ..SafetyConfig::default()
        };
        let (pipeline, _audit, _rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::clean(CheckKind::BiasScanner),
            StubCheck::crisis_firing(0.6, 0.95, vec!["hopelessness".into()]),
            config,
        );
        let outcome = pipeline.validate(SessionId::new(), &content()).await;
        // 0.6 maps to High on default floors; the lowered severe floor
        // reclassifies it.
        let assessment = outcome.crisis.expect("crisis assessment");
        assert_eq!(assessment.severity, CrisisSeverity::Severe);
    }

    #[tokio::test]
    async fn test_deadline_falls_back_to_rule_verdict() {
        let config = SafetyConfig {
            validation_deadline_ms: 50,
            ..SafetyConfig::default()
        };
        let (pipeline, _audit, _rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::clean(CheckKind::BiasScanner).with_delay(500),
            StubCheck::clean(CheckKind::CrisisScanner)
                .with_confidence(0.1)
                .with_delay(500),
            config,
        );
        let started = std::time::Instant::now();
        let outcome = pipeline.validate(SessionId::new(), &content()).await;
        assert!(started.elapsed() < Duration::from_millis(150));
        assert!(outcome.passed());
        assert!(outcome.result.fallback_used);
        assert!(outcome.result.deadline_expired);
        assert!(!outcome.hard_failure);
    }

    #[tokio::test]
    async fn test_deadline_with_no_rule_verdict_fails_closed() {
        let config = SafetyConfig {
            validation_deadline_ms: 50,
            ..SafetyConfig::default()
        };
        let (pipeline, _audit, _rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter).with_delay(500),
            StubCheck::clean(CheckKind::BiasScanner).with_delay(500),
            StubCheck::clean(CheckKind::CrisisScanner)
                .with_confidence(0.1)
                .with_delay(500),
            config,
        );
        let outcome = pipeline.validate(SessionId::new(), &content()).await;
        assert!(!outcome.passed());
        assert!(outcome.result.fallback_used);
        assert!(outcome.result.deadline_expired);
        assert!(outcome.hard_failure);
    }

    #[tokio::test]
    async fn test_late_crisis_firing_is_escalated() {
        let config = SafetyConfig {
            validation_deadline_ms: 40,
            ..SafetyConfig::default()
        };
        let (pipeline, audit, mut rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::clean(CheckKind::BiasScanner),
            StubCheck::crisis_firing(0.7, 0.9, vec!["hopelessness".into()]).with_delay(120),
            config,
        );
        let session_id = SessionId::new();
        let outcome = pipeline.validate(session_id, &content()).await;
        // The deadline returned the rule-fallback result...
        assert!(outcome.result.deadline_expired);
        assert!(outcome.crisis.is_none());

        // ...but the detached crisis check still escalates.
        let late = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("late crisis within budget")
            .expect("channel open");
        assert_eq!(late.session_id, session_id);
        assert_eq!(late.severity, CrisisSeverity::High);
        assert!(audit
            .snapshot()
            .iter()
            .any(|r| r.record_kind() == "crisis"));
    }

    #[tokio::test]
    async fn test_classifier_error_degrades_to_rule_only() {
        let (pipeline, _audit, _rx) = pipeline_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::failing(CheckKind::BiasScanner),
            StubCheck::clean(CheckKind::CrisisScanner).with_confidence(0.1),
            SafetyConfig::default(),
        );
        let outcome = pipeline.validate(SessionId::new(), &content()).await;
        assert!(outcome.passed());
        assert!(outcome.result.fallback_used);
    }

    #[tokio::test]
    async fn test_breaker_trips_into_degraded_mode() {
        let audit = Arc::new(InMemoryAuditSink::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let pipeline = SafetyPipeline::new(
            Arc::new(StubCheck::clean(CheckKind::RuleFilter)),
            Arc::new(StubCheck::failing(CheckKind::BiasScanner)),
            Arc::new(StubCheck::clean(CheckKind::CrisisScanner).with_confidence(0.1)),
            BreakerConfig {
                failure_threshold: 2,
                window: Duration::from_secs(30),
                cooldown: Duration::from_secs(60),
            },
            audit,
            Arc::new(EventBus::default()),
            Arc::new(SystemClockForTests),
            SafetyConfig::default(),
            tx,
        );
        let session_id = SessionId::new();
        let unit = content();
        // Two failing calls trip the bias breaker.
        pipeline.validate(session_id, &unit).await;
        pipeline.validate(session_id, &unit).await;
        // Third call runs rule-only; still flagged as fallback.
        let outcome = pipeline.validate(session_id, &unit).await;
        assert!(outcome.passed());
        assert!(outcome.result.fallback_used);
    }
}
