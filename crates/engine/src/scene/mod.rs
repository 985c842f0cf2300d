//! Scene manager.
//!
//! Tracks at most one active scene context per session, gates every entry
//! through the safety pipeline, and flushes delayed consequences queued for
//! the next scene entry. While a session's safety level is crisis, only
//! crisis-resolution scenes are admitted.

use std::sync::Arc;

use dashmap::DashMap;

use solace_domain::{
    ConsequenceTrigger, CrisisAssessment, DomainError, EngineEvent, SafetyLevel, SceneContext,
    SceneDefinition, SceneId, SceneType, Session, SessionId, ValidationResult,
};

use crate::config::EngagementWeights;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::ports::ClockPort;
use crate::safety::SafetyPipeline;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Session {0} already has an active scene")]
    SceneAlreadyActive(SessionId),
    #[error("No active scene for session {0}")]
    NoActiveScene(SessionId),
    #[error("Session {0} is suspended; only crisis-resolution scenes are admitted")]
    Suspended(SessionId),
    #[error("Scene content blocked by validation")]
    ValidationFailed {
        result: Box<ValidationResult>,
        /// Fail-closed with no rule verdict; counts toward the session's
        /// hard-failure budget.
        hard: bool,
    },
    #[error("Crisis indicators detected in scene content")]
    CrisisDetected(Box<CrisisAssessment>),
}

/// Successful scene entry: the tracked context and the admitting validation.
#[derive(Debug)]
pub struct SceneEntry {
    pub context: SceneContext,
    pub validation: ValidationResult,
}

/// Successful scene exit with its computed engagement score.
#[derive(Debug)]
pub struct SceneExit {
    pub scene_id: SceneId,
    pub duration_secs: f64,
    pub engagement_score: f64,
}

pub struct SceneManager {
    contexts: DashMap<SessionId, SceneContext>,
    pipeline: Arc<SafetyPipeline>,
    bus: Arc<EventBus>,
    clock: Arc<dyn ClockPort>,
    engagement: EngagementWeights,
}

impl SceneManager {
    pub fn new(
        pipeline: Arc<SafetyPipeline>,
        bus: Arc<EventBus>,
        clock: Arc<dyn ClockPort>,
        engagement: EngagementWeights,
    ) -> Self {
        Self {
            contexts: DashMap::new(),
            pipeline,
            bus,
            clock,
            engagement,
        }
    }

    /// Snapshot of the session's active scene context, if any.
    pub fn context(&self, session_id: SessionId) -> Option<SceneContext> {
        self.contexts.get(&session_id).map(|entry| entry.clone())
    }

    /// Enters a scene: validates its content, flushes delayed consequences,
    /// and activates the tracked context.
    ///
    /// A crisis detection or validation failure leaves the session without an
    /// active scene; the caller decides between substitution and escalation.
    pub async fn enter(
        &self,
        session: &mut Session,
        definition: &SceneDefinition,
    ) -> Result<SceneEntry, SceneError> {
        if session.safety_level() == SafetyLevel::Crisis
            && definition.scene_type() != SceneType::CrisisResolution
        {
            return Err(SceneError::Suspended(session.id()));
        }
        if self.contexts.contains_key(&session.id()) {
            return Err(SceneError::SceneAlreadyActive(session.id()));
        }

        let outcome = self
            .pipeline
            .validate(session.id(), definition.content())
            .await;
        if let Some(assessment) = outcome.crisis {
            return Err(SceneError::CrisisDetected(Box::new(assessment)));
        }
        if !outcome.passed() {
            return Err(SceneError::ValidationFailed {
                result: Box::new(outcome.result),
                hard: outcome.hard_failure,
            });
        }

        // Delayed consequences fire before the scene becomes visible so the
        // entered scene already reflects them.
        for queued in session.drain_pending_consequences() {
            debug_assert_eq!(
                queued.consequence.trigger,
                ConsequenceTrigger::OnNextSceneEntry
            );
            tracing::debug!(
                session_id = %session.id(),
                choice_id = %queued.choice_id,
                "Applying delayed consequence at scene entry"
            );
            session.apply_consequence(&queued.consequence);
        }

        let now = self.clock.now();
        let context = SceneContext::enter(definition.id(), session.id(), outcome.result.id, now);
        self.contexts.insert(session.id(), context.clone());
        session.set_current_scene(definition.id(), now);
        tracing::info!(
            session_id = %session.id(),
            scene_id = %definition.id(),
            scene_type = %definition.scene_type(),
            "Scene entered"
        );
        self.bus.publish(EngineEvent::SceneEntered {
            session_id: session.id(),
            scene_id: definition.id(),
            at: now,
        });
        Ok(SceneEntry {
            context,
            validation: outcome.result,
        })
    }

    /// Completes the active scene and computes its engagement score.
    pub fn exit(&self, session: &mut Session) -> Result<SceneExit, SceneError> {
        let (_, mut context) = self
            .contexts
            .remove(&session.id())
            .ok_or(SceneError::NoActiveScene(session.id()))?;
        let now = self.clock.now();
        let duration_secs = context.complete(now)?;
        let engagement_score = self
            .engagement
            .score(context.interaction_count(), duration_secs);
        session.clear_current_scene(now);
        tracing::info!(
            session_id = %session.id(),
            scene_id = %context.scene_id(),
            duration_secs,
            engagement_score,
            "Scene exited"
        );
        self.bus.publish(EngineEvent::SceneExited {
            session_id: session.id(),
            scene_id: context.scene_id(),
            duration_secs,
            engagement_score,
            at: now,
        });
        Ok(SceneExit {
            scene_id: context.scene_id(),
            duration_secs,
            engagement_score,
        })
    }

    /// Counts one user interaction against the active scene.
    pub fn record_interaction(&self, session_id: SessionId) -> Result<(), SceneError> {
        let mut entry = self
            .contexts
            .get_mut(&session_id)
            .ok_or(SceneError::NoActiveScene(session_id))?;
        entry.record_interaction();
        Ok(())
    }

    /// Drops any tracked context for a session that is going away.
    pub fn forget(&self, session_id: SessionId) {
        self.contexts.remove(&session_id);
    }
}
