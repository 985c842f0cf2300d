//! Choice processor.
//!
//! Presents choices, runs submitted choices through safety validation and
//! therapeutic-alignment scoring, and applies the consequences of accepted
//! ones. The tie-break between competing verdicts is fixed: safety beats
//! alignment, and the crisis allow-list beats both while a session's safety
//! level is crisis.

use std::sync::Arc;

use dashmap::DashMap;

use solace_domain::{
    Choice, ChoiceId, Consequence, ConsequenceTrigger, CrisisAssessment, DomainError, EngineEvent,
    QueuedConsequence, SafetyLevel, SceneDefinition, Session, SessionId, ValidationStatus,
};

use crate::config::{CrisisConfig, SafetyConfig};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::ports::ClockPort;
use crate::safety::{AlignmentScorer, SafetyPipeline};

#[derive(Debug, thiserror::Error)]
pub enum ChoiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Unknown choice {0}")]
    UnknownChoice(ChoiceId),
    #[error("Choice {0} was presented in a different scene")]
    WrongScene(ChoiceId),
    #[error("Session {0} has no active scene")]
    NoActiveScene(SessionId),
}

/// Author-side description of a choice being offered.
#[derive(Debug, Clone)]
pub struct ChoiceDraft {
    pub body: String,
    pub choice_type: solace_domain::ChoiceType,
    pub therapeutic_tags: Vec<String>,
    pub consequences: Vec<Consequence>,
}

/// The finalized choice plus anything validation surfaced alongside it.
#[derive(Debug)]
pub struct ChoiceValidation {
    pub choice: Choice,
    pub crisis: Option<CrisisAssessment>,
    /// Validation failed closed with no rule verdict available.
    pub hard_failure: bool,
}

pub struct ChoiceProcessor {
    choices: DashMap<ChoiceId, Choice>,
    pipeline: Arc<SafetyPipeline>,
    scorer: AlignmentScorer,
    bus: Arc<EventBus>,
    clock: Arc<dyn ClockPort>,
    safety: SafetyConfig,
    crisis_policy: CrisisConfig,
}

impl ChoiceProcessor {
    pub fn new(
        pipeline: Arc<SafetyPipeline>,
        scorer: AlignmentScorer,
        bus: Arc<EventBus>,
        clock: Arc<dyn ClockPort>,
        safety: SafetyConfig,
        crisis_policy: CrisisConfig,
    ) -> Self {
        Self {
            choices: DashMap::new(),
            pipeline,
            scorer,
            bus,
            clock,
            safety,
            crisis_policy,
        }
    }

    pub fn choice(&self, id: ChoiceId) -> Option<Choice> {
        self.choices.get(&id).map(|entry| entry.clone())
    }

    /// Presents a choice within the session's current scene.
    pub fn present(
        &self,
        session: &Session,
        scene: &SceneDefinition,
        draft: ChoiceDraft,
    ) -> Result<Choice, ChoiceError> {
        if session.current_scene_id() != Some(scene.id()) {
            return Err(ChoiceError::NoActiveScene(session.id()));
        }
        let now = self.clock.now();
        let mut choice = Choice::present(scene.id(), draft.body, draft.choice_type, now)
            .with_tags(draft.therapeutic_tags);
        for consequence in draft.consequences {
            choice = choice.with_consequence(consequence);
        }
        tracing::debug!(
            session_id = %session.id(),
            choice_id = %choice.id(),
            choice_type = %choice.choice_type(),
            "Choice presented"
        );
        self.bus.publish(EngineEvent::ChoicePresented {
            session_id: session.id(),
            scene_id: scene.id(),
            choice_id: choice.id(),
            at: now,
        });
        self.choices.insert(choice.id(), choice.clone());
        Ok(choice)
    }

    /// Validates a submitted choice and finalizes its status.
    pub async fn validate(
        &self,
        session: &Session,
        scene: &SceneDefinition,
        choice_id: ChoiceId,
    ) -> Result<ChoiceValidation, ChoiceError> {
        // The guard is not held across the validation await; the per-session
        // ordering lock upstream keeps concurrent validates off the same
        // choice.
        let content = {
            let mut entry = self
                .choices
                .get_mut(&choice_id)
                .ok_or(ChoiceError::UnknownChoice(choice_id))?;
            let choice = entry.value_mut();
            if choice.scene_id() != scene.id() {
                return Err(ChoiceError::WrongScene(choice_id));
            }
            choice.begin_validation()?;
            choice.content().clone()
        };

        let outcome = self.pipeline.validate(session.id(), &content).await;

        let mut entry = self
            .choices
            .get_mut(&choice_id)
            .ok_or(ChoiceError::UnknownChoice(choice_id))?;
        let choice = entry.value_mut();
        let alignment = self.scorer.score(
            choice,
            scene.scene_type(),
            scene.therapeutic_focus(),
            session.emotional_state(),
        );

        let status = if outcome.crisis.is_some() {
            ValidationStatus::SafetyConcern
        } else if !outcome.passed() || outcome.result.deadline_expired {
            ValidationStatus::SafetyConcern
        } else if outcome.safety_score.value() < self.safety.safety_floor {
            ValidationStatus::SafetyConcern
        } else if alignment.value() < self.safety.alignment_floor {
            ValidationStatus::TherapeuticMismatch
        } else if session.safety_level() == SafetyLevel::Crisis
            && !self
                .crisis_policy
                .allowed_choice_types
                .contains(&choice.choice_type())
        {
            ValidationStatus::RequiresConfirmation
        } else {
            ValidationStatus::Valid
        };

        choice.finalize(status, outcome.safety_score, alignment, self.clock.now())?;
        tracing::info!(
            session_id = %session.id(),
            choice_id = %choice_id,
            status = %status,
            safety_score = %outcome.safety_score,
            alignment_score = %alignment,
            "Choice validated"
        );
        Ok(ChoiceValidation {
            choice: choice.clone(),
            crisis: outcome.crisis,
            hard_failure: outcome.hard_failure,
        })
    }

    /// Applies a Valid choice: immediate consequences now, delayed ones
    /// queued on the session. A second apply of the same choice fails on the
    /// state machine, making application idempotent at the caller.
    pub fn apply(&self, session: &mut Session, choice_id: ChoiceId) -> Result<Choice, ChoiceError> {
        let mut entry = self
            .choices
            .get_mut(&choice_id)
            .ok_or(ChoiceError::UnknownChoice(choice_id))?;
        let choice = entry.value_mut();
        choice.mark_applied()?;

        for consequence in choice.consequences() {
            match consequence.trigger {
                ConsequenceTrigger::Immediate => session.apply_consequence(consequence),
                ConsequenceTrigger::OnNextSceneEntry => {
                    session.queue_consequence(QueuedConsequence {
                        choice_id,
                        consequence: consequence.clone(),
                    });
                }
            }
        }

        let now = self.clock.now();
        tracing::info!(
            session_id = %session.id(),
            choice_id = %choice_id,
            "Choice applied"
        );
        self.bus.publish(EngineEvent::ChoiceApplied {
            session_id: session.id(),
            choice_id,
            at: now,
        });
        Ok(choice.clone())
    }

    /// Explicitly rejects a finalized choice that will not be applied.
    pub fn reject(&self, choice_id: ChoiceId) -> Result<Choice, ChoiceError> {
        let mut entry = self
            .choices
            .get_mut(&choice_id)
            .ok_or(ChoiceError::UnknownChoice(choice_id))?;
        let choice = entry.value_mut();
        choice.mark_rejected()?;
        Ok(choice.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc;

    use solace_domain::{
        ChoiceType, ContentSource, ContentUnit, EmotionShift, SceneType, SessionStatus,
        VariableDelta, VariableValue,
    };

    use crate::config::AlignmentWeights;
    use crate::infrastructure::circuit_breaker::BreakerConfig;
    use crate::infrastructure::memory::InMemoryAuditSink;
    use crate::infrastructure::ports::CheckKind;
    use crate::testing::{StubCheck, SystemClockForTests};

    fn processor_with(rule: StubCheck, crisis: StubCheck) -> ChoiceProcessor {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pipeline = Arc::new(SafetyPipeline::new(
            Arc::new(rule),
            Arc::new(StubCheck::clean(CheckKind::BiasScanner)),
            Arc::new(crisis),
            BreakerConfig::default(),
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(EventBus::default()),
            Arc::new(SystemClockForTests),
            crate::config::SafetyConfig::default(),
            tx,
        ));
        ChoiceProcessor::new(
            pipeline,
            AlignmentScorer::new(AlignmentWeights::default()),
            Arc::new(EventBus::default()),
            Arc::new(SystemClockForTests),
            SafetyConfig::default(),
            CrisisConfig::default(),
        )
    }

    fn processor() -> ChoiceProcessor {
        processor_with(
            StubCheck::clean(CheckKind::RuleFilter),
            StubCheck::clean(CheckKind::CrisisScanner).with_confidence(0.1),
        )
    }

    fn scene_and_session() -> (SceneDefinition, Session) {
        let now = Utc::now();
        let scene = SceneDefinition::new(
            SceneType::Exploration,
            ContentUnit::new(ContentSource::SceneDefinition, "a forked path"),
        )
        .with_focus(vec!["curiosity".into()]);
        let mut session = Session::new("user-1", now);
        session.transition_to(SessionStatus::Ready, now).expect("ready");
        session.transition_to(SessionStatus::Running, now).expect("running");
        session.set_current_scene(scene.id(), now);
        (scene, session)
    }

    fn draft(choice_type: ChoiceType) -> ChoiceDraft {
        ChoiceDraft {
            body: "take the left path".into(),
            choice_type,
            therapeutic_tags: vec!["curiosity".into()],
            consequences: vec![],
        }
    }

    #[tokio::test]
    async fn test_present_validate_apply_happy_path() {
        let processor = processor();
        let (scene, mut session) = scene_and_session();
        let choice = processor
            .present(&session, &scene, draft(ChoiceType::Narrative))
            .expect("present");

        let validation = processor
            .validate(&session, &scene, choice.id())
            .await
            .expect("validate");
        assert_eq!(validation.choice.status(), ValidationStatus::Valid);
        assert!(validation.crisis.is_none());

        let applied = processor.apply(&mut session, choice.id()).expect("apply");
        assert_eq!(applied.status(), ValidationStatus::Applied);
    }

    #[tokio::test]
    async fn test_second_apply_is_rejected() {
        let processor = processor();
        let (scene, mut session) = scene_and_session();
        let choice = processor
            .present(&session, &scene, draft(ChoiceType::Narrative))
            .expect("present");
        processor
            .validate(&session, &scene, choice.id())
            .await
            .expect("validate");
        processor.apply(&mut session, choice.id()).expect("first apply");

        let err = processor
            .apply(&mut session, choice.id())
            .expect_err("second apply");
        assert!(matches!(err, ChoiceError::Domain(_)));
        // Session variables untouched by the duplicate.
        assert!(session.variables().is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_choice_resolves_to_safety_concern() {
        let processor = processor_with(
            StubCheck::flagged(CheckKind::RuleFilter, 0.1, vec!["harmful_content".into()]),
            StubCheck::clean(CheckKind::CrisisScanner).with_confidence(0.1),
        );
        let (scene, session) = scene_and_session();
        let choice = processor
            .present(&session, &scene, draft(ChoiceType::Narrative))
            .expect("present");
        let validation = processor
            .validate(&session, &scene, choice.id())
            .await
            .expect("validate");
        assert_eq!(validation.choice.status(), ValidationStatus::SafetyConcern);
    }

    #[tokio::test]
    async fn test_misaligned_choice_resolves_to_therapeutic_mismatch() {
        let processor = processor();
        let (scene, session) = scene_and_session();
        // No tag overlap and a weak type affinity for the scene.
        let choice = processor
            .present(
                &session,
                &scene,
                ChoiceDraft {
                    body: "argue loudly".into(),
                    choice_type: ChoiceType::Dialogue,
                    therapeutic_tags: vec![],
                    consequences: vec![],
                },
            )
            .expect("present");
        let validation = processor
            .validate(&session, &scene, choice.id())
            .await
            .expect("validate");
        assert_eq!(
            validation.choice.status(),
            ValidationStatus::TherapeuticMismatch
        );
    }

    #[tokio::test]
    async fn test_crisis_allow_list_gates_choice_types() {
        let processor = processor();
        let (scene, mut session) = scene_and_session();
        session.set_safety_level(SafetyLevel::Crisis, Utc::now());

        let narrative = processor
            .present(&session, &scene, draft(ChoiceType::Narrative))
            .expect("present");
        let validation = processor
            .validate(&session, &scene, narrative.id())
            .await
            .expect("validate");
        assert_eq!(
            validation.choice.status(),
            ValidationStatus::RequiresConfirmation
        );
        // An explicit confirmation can still apply it.
        let confirmed = processor
            .apply(&mut session, narrative.id())
            .expect("apply after confirmation");
        assert_eq!(confirmed.status(), ValidationStatus::Applied);

        let grounding = processor
            .present(&session, &scene, draft(ChoiceType::GroundingExercise))
            .expect("present");
        let validation = processor
            .validate(&session, &scene, grounding.id())
            .await
            .expect("validate");
        assert_eq!(validation.choice.status(), ValidationStatus::Valid);
    }

    #[tokio::test]
    async fn test_consequences_split_immediate_and_delayed() {
        let processor = processor();
        let (scene, mut session) = scene_and_session();
        let choice = processor
            .present(
                &session,
                &scene,
                ChoiceDraft {
                    body: "share the memory".into(),
                    choice_type: ChoiceType::Narrative,
                    therapeutic_tags: vec!["curiosity".into()],
                    consequences: vec![
                        Consequence::immediate()
                            .with_delta(VariableDelta::increment("trust", 1.0))
                            .with_shift(EmotionShift::new("hope", 0.2)),
                        Consequence::on_next_scene_entry()
                            .with_delta(VariableDelta::increment("trust", 2.0)),
                    ],
                },
            )
            .expect("present");
        processor
            .validate(&session, &scene, choice.id())
            .await
            .expect("validate");
        processor.apply(&mut session, choice.id()).expect("apply");

        assert_eq!(
            session.variable("trust").and_then(VariableValue::as_number),
            Some(1.0)
        );
        assert_eq!(session.pending_consequences().len(), 1);
    }
}
