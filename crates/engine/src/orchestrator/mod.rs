//! Session orchestrator.
//!
//! The single entry point for session lifecycle operations. Every operation
//! takes a per-session ordering lock, loads the session, applies the change
//! through the owning component, and commits with a version bump, so
//! concurrent calls against one session serialize while different sessions
//! proceed in parallel. The orchestrator also consumes late crisis firings
//! from the safety pipeline and enforces the hard-validation-failure budget.

pub mod monitor;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use solace_domain::{
    Choice, ChoiceId, ContentSource, ContentUnit, CrisisAssessment, DomainError, EngineEvent,
    SceneDefinition, SceneId, Session, SessionId, SessionStatus, ValidationStatus,
};

use crate::choice::{ChoiceDraft, ChoiceError, ChoiceProcessor};
use crate::config::EngineConfig;
use crate::crisis::{CrisisController, CrisisEngagement, CrisisError, ResolutionSignal};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::ports::{
    ClockPort, GenerationError, GeneratorPort, PromptContext, ResourceBundle, SessionRepo,
    StoreError,
};
use crate::scene::{SceneEntry, SceneError, SceneExit, SceneManager};

pub use solace_domain::CompletionReason;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Choice(#[from] ChoiceError),
    #[error(transparent)]
    Crisis(#[from] CrisisError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),
    #[error("Session {session_id} is {status}; operation requires {required}")]
    WrongStatus {
        session_id: SessionId,
        status: SessionStatus,
        required: SessionStatus,
    },
    #[error("Unknown scene {0}")]
    UnknownScene(SceneId),
    #[error("Crisis intervention engaged for session {0}")]
    CrisisEngaged(SessionId),
}

/// What submitting a choice resolved to.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// The choice was valid and its consequences were applied.
    Applied(Choice),
    /// Validation finalized the choice in a non-applicable status and it was
    /// rejected.
    Rejected(Choice),
    /// The choice stays in `RequiresConfirmation`; nothing was applied.
    NeedsConfirmation(Choice),
    /// Crisis indicators were detected; the choice was rejected, the session
    /// suspended, and resources provided.
    CrisisEngaged {
        choice: Choice,
        assessment: Box<CrisisAssessment>,
        resources: Option<ResourceBundle>,
    },
}

pub struct Orchestrator {
    repo: Arc<dyn SessionRepo>,
    generator: Arc<dyn GeneratorPort>,
    scenes: Arc<SceneManager>,
    choices: Arc<ChoiceProcessor>,
    crisis: Arc<CrisisController>,
    bus: Arc<EventBus>,
    clock: Arc<dyn ClockPort>,
    config: EngineConfig,
    /// Per-session ordering locks; operations on one session serialize.
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
    /// Sessions this engine instance is responsible for sweeping.
    tracked: DashMap<SessionId, ()>,
    /// Definitions of scenes entered or generated, for choice validation.
    definitions: DashMap<SceneId, SceneDefinition>,
    hard_failures: DashMap<SessionId, u32>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn SessionRepo>,
        generator: Arc<dyn GeneratorPort>,
        scenes: Arc<SceneManager>,
        choices: Arc<ChoiceProcessor>,
        crisis: Arc<CrisisController>,
        bus: Arc<EventBus>,
        clock: Arc<dyn ClockPort>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repo,
            generator,
            scenes,
            choices,
            crisis,
            bus,
            clock,
            config,
            locks: DashMap::new(),
            tracked: DashMap::new(),
            definitions: DashMap::new(),
            hard_failures: DashMap::new(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn crisis_phase(&self, session_id: SessionId) -> solace_domain::InterventionPhase {
        self.crisis.phase(session_id)
    }

    /// Snapshot of a session's committed state.
    pub async fn session(&self, session_id: SessionId) -> Result<Session, EngineError> {
        self.load(session_id).await
    }

    /// Snapshot of the session's active scene context, if any.
    pub fn scene_context(&self, session_id: SessionId) -> Option<solace_domain::SceneContext> {
        self.scenes.context(session_id)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Creates a session in `Ready`. The first successful scene entry takes
    /// it to `Running`.
    pub async fn start_session(&self, user_id: impl Into<String>) -> Result<Session, EngineError> {
        let now = self.clock.now();
        let mut session = Session::new(user_id, now);
        self.transition(&mut session, SessionStatus::Ready)?;
        session.touch(self.clock.now());
        self.repo.save(&session).await?;
        self.tracked.insert(session.id(), ());
        tracing::info!(session_id = %session.id(), user_id = %session.user_id(), "Session started");
        Ok(session)
    }

    /// Pauses a running session. State is already durable; pause only marks
    /// the session resumable.
    pub async fn pause_session(&self, session_id: SessionId) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.require_status(&session, SessionStatus::Running)?;
        self.transition(&mut session, SessionStatus::Paused)?;
        self.commit(&mut session).await?;
        Ok(session)
    }

    /// Resumes a paused session with its full snapshot intact.
    pub async fn resume_session(&self, session_id: SessionId) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.require_status(&session, SessionStatus::Paused)?;
        self.transition(&mut session, SessionStatus::Running)?;
        self.commit(&mut session).await?;
        tracing::info!(session_id = %session_id, "Session resumed");
        Ok(session)
    }

    /// Completes a session with the given reason.
    pub async fn end_session(
        &self,
        session_id: SessionId,
        reason: CompletionReason,
    ) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        let from = session.status();
        session.complete(reason, self.clock.now())?;
        self.scenes.forget(session_id);
        self.publish_state_change(&session, from);
        self.publish_completion_metrics(&session, reason);
        self.commit(&mut session).await?;
        Ok(session)
    }

    /// Final teardown of a completed or errored session.
    pub async fn shutdown_session(&self, session_id: SessionId) -> Result<(), EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        let from = session.status();
        session.transition_to(SessionStatus::Shutdown, self.clock.now())?;
        self.publish_state_change(&session, from);
        self.commit(&mut session).await?;
        self.scenes.forget(session_id);
        self.crisis.forget(session_id);
        self.tracked.remove(&session_id);
        self.hard_failures.remove(&session_id);
        self.locks.remove(&session_id);
        tracing::info!(session_id = %session_id, "Session shut down");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Scenes
    // -------------------------------------------------------------------------

    /// Enters an authored scene. Crisis detection in the scene's content
    /// engages the intervention controller before returning.
    pub async fn enter_scene(
        &self,
        session_id: SessionId,
        definition: SceneDefinition,
    ) -> Result<SceneEntry, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.require_runnable(&session)?;
        let entry = self.enter_locked(&mut session, &definition).await;
        self.commit(&mut session).await?;
        entry
    }

    /// Generates a scene from the session snapshot and enters it. Generator
    /// failure or blocked output substitutes the pre-approved fallback
    /// content rather than surfacing raw failure.
    pub async fn generate_scene(
        &self,
        session_id: SessionId,
        prompt: PromptContext,
    ) -> Result<SceneEntry, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.require_runnable(&session)?;

        let definition = match self.generator.generate(&session, &prompt).await {
            Ok(content) => SceneDefinition::new(prompt.scene_type, content)
                .with_focus(prompt.therapeutic_focus.clone()),
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Generation failed; substituting fallback scene"
                );
                self.fallback_definition(&prompt)
            }
        };

        let entry = match self.enter_locked(&mut session, &definition).await {
            Err(EngineError::Scene(SceneError::ValidationFailed { result, hard })) => {
                tracing::warn!(
                    session_id = %session_id,
                    validation_id = %result.id,
                    hard,
                    "Generated scene blocked; substituting fallback scene"
                );
                let fallback = self.fallback_definition(&prompt);
                self.enter_locked(&mut session, &fallback).await
            }
            other => other,
        };
        self.commit(&mut session).await?;
        entry
    }

    /// Exits the active scene, producing its engagement score.
    pub async fn exit_scene(&self, session_id: SessionId) -> Result<SceneExit, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.require_status(&session, SessionStatus::Running)?;
        let exit = self.scenes.exit(&mut session)?;
        self.commit(&mut session).await?;
        Ok(exit)
    }

    // -------------------------------------------------------------------------
    // Choices
    // -------------------------------------------------------------------------

    /// Presents a choice in the session's current scene.
    pub async fn present_choice(
        &self,
        session_id: SessionId,
        draft: ChoiceDraft,
    ) -> Result<Choice, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let session = self.load(session_id).await?;
        self.require_status(&session, SessionStatus::Running)?;
        let definition = self.current_definition(&session)?;
        Ok(self.choices.present(&session, &definition, draft)?)
    }

    /// Validates a submitted choice and applies it if valid. Crisis
    /// indicators in the choice suspend the session within the same call.
    pub async fn submit_choice(
        &self,
        session_id: SessionId,
        choice_id: ChoiceId,
    ) -> Result<SubmissionOutcome, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.require_status(&session, SessionStatus::Running)?;
        let definition = self.current_definition(&session)?;
        self.scenes.record_interaction(session_id)?;

        let validation = self
            .choices
            .validate(&session, &definition, choice_id)
            .await?;
        if validation.hard_failure {
            self.record_hard_failure(&mut session).await?;
        }

        let outcome = if let Some(assessment) = validation.crisis {
            let choice = self.choices.reject(choice_id)?;
            let engagement = self.crisis.engage(&mut session, &assessment).await?;
            let resources = match engagement {
                CrisisEngagement::Suspended { resources } => Some(resources),
                CrisisEngagement::Elevated => None,
            };
            SubmissionOutcome::CrisisEngaged {
                choice,
                assessment: Box::new(assessment),
                resources,
            }
        } else {
            match validation.choice.status() {
                ValidationStatus::Valid => {
                    let choice = self.choices.apply(&mut session, choice_id)?;
                    SubmissionOutcome::Applied(choice)
                }
                ValidationStatus::RequiresConfirmation => {
                    SubmissionOutcome::NeedsConfirmation(validation.choice)
                }
                _ => {
                    let choice = self.choices.reject(choice_id)?;
                    SubmissionOutcome::Rejected(choice)
                }
            }
        };
        self.commit(&mut session).await?;
        Ok(outcome)
    }

    /// Applies a choice that validation left in `RequiresConfirmation`, on an
    /// explicit caller confirmation. Used for non-allow-list choices during
    /// crisis monitoring that a human has approved.
    pub async fn confirm_choice(
        &self,
        session_id: SessionId,
        choice_id: ChoiceId,
    ) -> Result<Choice, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.require_status(&session, SessionStatus::Running)?;
        let choice = self.choices.apply(&mut session, choice_id)?;
        self.commit(&mut session).await?;
        tracing::info!(session_id = %session_id, choice_id = %choice_id, "Choice confirmed and applied");
        Ok(choice)
    }

    // -------------------------------------------------------------------------
    // Crisis
    // -------------------------------------------------------------------------

    /// Resolves an active crisis intervention on an authorized signal.
    pub async fn resolve_crisis(
        &self,
        session_id: SessionId,
        signal: ResolutionSignal,
    ) -> Result<(), EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = self.load(session_id).await?;
        self.crisis.resolve(&mut session, signal).await?;
        self.commit(&mut session).await?;
        Ok(())
    }

    /// Handles a crisis assessment that fired after its validation already
    /// returned. Terminal sessions are left alone; everything else engages
    /// the intervention controller.
    pub(crate) async fn handle_late_crisis(&self, assessment: CrisisAssessment) {
        let session_id = assessment.session_id;
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = match self.load(session_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Late crisis for unloadable session"
                );
                return;
            }
        };
        if session.status().is_terminal() {
            tracing::info!(
                session_id = %session_id,
                "Late crisis for terminal session; audited but not engaged"
            );
            return;
        }
        if let Err(e) = self.crisis.engage(&mut session, &assessment).await {
            tracing::error!(session_id = %session_id, error = %e, "Late crisis engagement failed");
            return;
        }
        if let Err(e) = self.commit(&mut session).await {
            tracing::error!(session_id = %session_id, error = %e, "Late crisis commit failed");
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn enter_locked(
        &self,
        session: &mut Session,
        definition: &SceneDefinition,
    ) -> Result<SceneEntry, EngineError> {
        self.definitions.insert(definition.id(), definition.clone());
        match self.scenes.enter(session, definition).await {
            Ok(entry) => {
                self.hard_failures.remove(&session.id());
                if session.status() == SessionStatus::Ready {
                    self.transition(session, SessionStatus::Running)?;
                }
                Ok(entry)
            }
            Err(SceneError::CrisisDetected(assessment)) => {
                self.crisis.engage(session, &assessment).await?;
                Err(EngineError::CrisisEngaged(session.id()))
            }
            Err(SceneError::ValidationFailed { result, hard }) => {
                if hard {
                    self.record_hard_failure(session).await?;
                }
                Err(EngineError::Scene(SceneError::ValidationFailed {
                    result,
                    hard,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Counts a fail-closed validation with no fallback verdict. Exhausting
    /// the budget moves the session to Error.
    async fn record_hard_failure(&self, session: &mut Session) -> Result<(), EngineError> {
        let count = {
            let mut entry = self.hard_failures.entry(session.id()).or_insert(0);
            *entry += 1;
            *entry
        };
        tracing::warn!(
            session_id = %session.id(),
            count,
            budget = self.config.session.max_hard_validation_failures,
            "Hard validation failure recorded"
        );
        if count >= self.config.session.max_hard_validation_failures
            && !session.status().is_terminal()
        {
            let from = session.status();
            session.transition_to(SessionStatus::Error, self.clock.now())?;
            self.publish_state_change(session, from);
            tracing::error!(
                session_id = %session.id(),
                "Hard-failure budget exhausted; session moved to error"
            );
        }
        Ok(())
    }

    fn fallback_definition(&self, prompt: &PromptContext) -> SceneDefinition {
        SceneDefinition::new(
            prompt.scene_type,
            ContentUnit::new(
                ContentSource::Fallback,
                self.config.fallback.content_body.clone(),
            ),
        )
        .with_focus(prompt.therapeutic_focus.clone())
    }

    fn current_definition(&self, session: &Session) -> Result<SceneDefinition, EngineError> {
        let scene_id = session
            .current_scene_id()
            .ok_or(EngineError::Choice(ChoiceError::NoActiveScene(session.id())))?;
        self.definitions
            .get(&scene_id)
            .map(|entry| entry.clone())
            .ok_or(EngineError::UnknownScene(scene_id))
    }

    fn lock_for(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, session_id: SessionId) -> Result<Session, EngineError> {
        self.repo
            .load(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))
    }

    /// Scene entry is also what takes a `Ready` session live.
    fn require_runnable(&self, session: &Session) -> Result<(), EngineError> {
        match session.status() {
            SessionStatus::Ready | SessionStatus::Running => Ok(()),
            status => Err(EngineError::WrongStatus {
                session_id: session.id(),
                status,
                required: SessionStatus::Running,
            }),
        }
    }

    fn require_status(
        &self,
        session: &Session,
        required: SessionStatus,
    ) -> Result<(), EngineError> {
        if session.status() != required {
            return Err(EngineError::WrongStatus {
                session_id: session.id(),
                status: session.status(),
                required,
            });
        }
        Ok(())
    }

    /// Guarded transition with a state-change event.
    fn transition(&self, session: &mut Session, to: SessionStatus) -> Result<(), EngineError> {
        let from = session.status();
        session.transition_to(to, self.clock.now())?;
        self.publish_state_change(session, from);
        Ok(())
    }

    /// Final metrics flush at completion, for embedders that consume the
    /// event stream.
    fn publish_completion_metrics(&self, session: &Session, reason: CompletionReason) {
        let now = self.clock.now();
        let total_duration_secs =
            (now - session.created_at()).num_milliseconds() as f64 / 1000.0;
        let scenes_visited = session.scene_history().len();
        tracing::info!(
            session_id = %session.id(),
            reason = %reason,
            scenes_visited,
            total_duration_secs,
            "Session completed"
        );
        self.bus.publish(EngineEvent::SessionCompleted {
            session_id: session.id(),
            reason,
            scenes_visited,
            total_duration_secs,
            at: now,
        });
    }

    fn publish_state_change(&self, session: &Session, from: SessionStatus) {
        self.bus.publish(EngineEvent::SessionStateChanged {
            session_id: session.id(),
            from,
            to: session.status(),
            at: self.clock.now(),
        });
    }

    /// Bumps the version and persists. Called exactly once per operation.
    async fn commit(&self, session: &mut Session) -> Result<(), EngineError> {
        session.touch(self.clock.now());
        self.repo.save(session).await?;
        Ok(())
    }

    /// Session ids this instance tracks, for the idle monitor.
    pub(crate) fn tracked_sessions(&self) -> Vec<SessionId> {
        self.tracked.iter().map(|entry| *entry.key()).collect()
    }

    /// Expires one idle paused session. Used by the background monitor.
    pub(crate) async fn expire_if_idle(&self, session_id: SessionId) {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut session = match self.load(session_id).await {
            Ok(session) => session,
            Err(_) => return,
        };
        if session.status() != SessionStatus::Paused {
            return;
        }
        let idle = self.clock.now() - session.updated_at();
        let max_idle = chrono::Duration::from_std(self.config.session.max_idle())
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        if idle < max_idle {
            return;
        }
        let from = session.status();
        if session
            .complete(CompletionReason::Expired, self.clock.now())
            .is_err()
        {
            return;
        }
        self.publish_state_change(&session, from);
        self.publish_completion_metrics(&session, CompletionReason::Expired);
        self.scenes.forget(session_id);
        if let Err(e) = self.commit(&mut session).await {
            tracing::error!(session_id = %session_id, error = %e, "Idle expiry commit failed");
            return;
        }
        tracing::info!(session_id = %session_id, "Idle session expired");
    }
}
