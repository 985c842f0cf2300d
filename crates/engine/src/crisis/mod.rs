//! Crisis intervention controller.
//!
//! Owns the per-session intervention state machine
//! (`Idle → Triggered → ResourcesProvided → Monitoring → Resolved`) and the
//! suspension of normal narrative flow. Engagement happens in the same
//! logical step as detection: between the assessment and the controller
//! taking over there is no window in which normal narrative continues.
//! Resource provision never fails open; a lookup failure substitutes the
//! statically configured bundle. Only an authorized resolution signal moves
//! the controller out of Monitoring.

use std::sync::Arc;

use dashmap::DashMap;

use solace_domain::{
    AssessmentId, AuditRecord, CrisisAssessment, EngineEvent, InterventionEvent, InterventionPhase,
    SafetyLevel, Session, SessionId,
};

use crate::config::CrisisConfig;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::ports::{AuditSink, ClockPort, CrisisResourcePort, ResourceBundle};

#[derive(Debug, thiserror::Error)]
pub enum CrisisError {
    #[error("Intervention transition rejected: {0}")]
    Phase(String),
    #[error("No active intervention for session {0}")]
    NotActive(SessionId),
    #[error("Resolution signal is not authorized")]
    Unauthorized,
}

/// External confirmation that a crisis has been handled. The engine never
/// auto-resolves.
#[derive(Debug, Clone)]
pub struct ResolutionSignal {
    pub authorized_by: String,
    pub note: Option<String>,
}

/// What engaging the controller did to the session.
#[derive(Debug)]
pub enum CrisisEngagement {
    /// Severity below the escalation floor: safety level raised, no
    /// suspension.
    Elevated,
    /// Narrative flow suspended; resources returned for immediate display.
    Suspended { resources: ResourceBundle },
}

pub struct CrisisController {
    phases: DashMap<SessionId, InterventionPhase>,
    active_assessments: DashMap<SessionId, AssessmentId>,
    resources: Arc<dyn CrisisResourcePort>,
    audit: Arc<dyn AuditSink>,
    bus: Arc<EventBus>,
    clock: Arc<dyn ClockPort>,
    config: CrisisConfig,
}

impl CrisisController {
    pub fn new(
        resources: Arc<dyn CrisisResourcePort>,
        audit: Arc<dyn AuditSink>,
        bus: Arc<EventBus>,
        clock: Arc<dyn ClockPort>,
        config: CrisisConfig,
    ) -> Self {
        Self {
            phases: DashMap::new(),
            active_assessments: DashMap::new(),
            resources,
            audit,
            bus,
            clock,
            config,
        }
    }

    pub fn phase(&self, session_id: SessionId) -> InterventionPhase {
        self.phases
            .get(&session_id)
            .map(|entry| *entry)
            .unwrap_or_default()
    }

    /// Whether normal narrative flow is suspended for this session.
    pub fn is_suspended(&self, session_id: SessionId) -> bool {
        matches!(
            self.phase(session_id),
            InterventionPhase::Triggered
                | InterventionPhase::ResourcesProvided
                | InterventionPhase::Monitoring
        )
    }

    /// Reacts to a crisis assessment. Escalates and suspends at or above the
    /// configured floor; below it the session's safety level is raised
    /// without interrupting the narrative.
    pub async fn engage(
        &self,
        session: &mut Session,
        assessment: &CrisisAssessment,
    ) -> Result<CrisisEngagement, CrisisError> {
        let now = self.clock.now();
        if assessment.severity < self.config.escalation_floor {
            tracing::info!(
                session_id = %session.id(),
                severity = %assessment.severity,
                "Crisis assessment below escalation floor; raising safety level"
            );
            session.set_safety_level(SafetyLevel::Elevated, now);
            return Ok(CrisisEngagement::Elevated);
        }

        // Re-detection while an intervention is already active: the user in
        // renewed distress gets the resource bundle again, not an error. The
        // re-detection is audited against the active intervention.
        if self.is_suspended(session.id()) {
            let phase = self.phase(session.id());
            tracing::warn!(
                session_id = %session.id(),
                severity = %assessment.severity,
                assessment_id = %assessment.id,
                %phase,
                "Crisis re-detected during active intervention; re-providing resources"
            );
            self.active_assessments.insert(session.id(), assessment.id);
            let event = InterventionEvent::new(session.id(), Some(assessment.id), phase, phase, now)
                .with_note("crisis re-detected during active intervention");
            self.audit.append(AuditRecord::Intervention(event)).await;
            let resources = self.provide_resources(session.id()).await;
            return Ok(CrisisEngagement::Suspended { resources });
        }

        self.transition(session.id(), Some(assessment.id), InterventionPhase::Triggered, None)
            .await?;
        self.active_assessments.insert(session.id(), assessment.id);
        session.set_safety_level(SafetyLevel::Crisis, now);
        tracing::warn!(
            session_id = %session.id(),
            severity = %assessment.severity,
            assessment_id = %assessment.id,
            "Crisis intervention engaged; narrative suspended"
        );
        self.bus.publish(EngineEvent::CrisisTriggered {
            session_id: session.id(),
            assessment_id: assessment.id,
            severity: assessment.severity,
            at: now,
        });
        self.bus.publish(EngineEvent::SessionSuspended {
            session_id: session.id(),
            at: now,
        });

        let resources = self.provide_resources(session.id()).await;
        self.transition(
            session.id(),
            Some(assessment.id),
            InterventionPhase::ResourcesProvided,
            None,
        )
        .await?;
        self.transition(
            session.id(),
            Some(assessment.id),
            InterventionPhase::Monitoring,
            None,
        )
        .await?;
        Ok(CrisisEngagement::Suspended { resources })
    }

    /// Resolves an active intervention on an authorized external signal.
    pub async fn resolve(
        &self,
        session: &mut Session,
        signal: ResolutionSignal,
    ) -> Result<(), CrisisError> {
        if signal.authorized_by.trim().is_empty() {
            return Err(CrisisError::Unauthorized);
        }
        if self.phase(session.id()) != InterventionPhase::Monitoring {
            return Err(CrisisError::NotActive(session.id()));
        }
        let assessment_id = self
            .active_assessments
            .get(&session.id())
            .map(|entry| *entry);
        let note = match signal.note {
            Some(note) => format!("resolved by {}: {}", signal.authorized_by, note),
            None => format!("resolved by {}", signal.authorized_by),
        };
        self.transition(
            session.id(),
            assessment_id,
            InterventionPhase::Resolved,
            Some(note),
        )
        .await?;
        self.active_assessments.remove(&session.id());

        let now = self.clock.now();
        session.set_safety_level(SafetyLevel::Standard, now);
        tracing::info!(
            session_id = %session.id(),
            authorized_by = %signal.authorized_by,
            "Crisis intervention resolved"
        );
        self.bus.publish(EngineEvent::CrisisResolved {
            session_id: session.id(),
            at: now,
        });
        Ok(())
    }

    pub fn forget(&self, session_id: SessionId) {
        self.phases.remove(&session_id);
        self.active_assessments.remove(&session_id);
    }

    async fn provide_resources(&self, session_id: SessionId) -> ResourceBundle {
        match self
            .resources
            .resources_for(&self.config.region, "general")
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Resource lookup failed; substituting static bundle"
                );
                self.config.static_bundle.clone()
            }
        }
    }

    async fn transition(
        &self,
        session_id: SessionId,
        assessment_id: Option<AssessmentId>,
        to: InterventionPhase,
        note: Option<String>,
    ) -> Result<(), CrisisError> {
        let from = self.phase(session_id);
        if !from.can_transition_to(to) {
            return Err(CrisisError::Phase(format!(
                "session {session_id} cannot move {from} -> {to}"
            )));
        }
        self.phases.insert(session_id, to);
        let mut event = InterventionEvent::new(session_id, assessment_id, from, to, self.clock.now());
        if let Some(note) = note {
            event = event.with_note(note);
        }
        self.audit.append(AuditRecord::Intervention(event)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use solace_domain::{Confidence, CrisisSeverity, SessionStatus};

    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::memory::InMemoryAuditSink;
    use crate::testing::{FailingResourcePort, StubResourcePort};

    fn running_session() -> Session {
        let now = Utc::now();
        let mut session = Session::new("user-1", now);
        session.transition_to(SessionStatus::Ready, now).expect("ready");
        session.transition_to(SessionStatus::Running, now).expect("running");
        session
    }

    fn assessment(session_id: SessionId, severity: CrisisSeverity) -> CrisisAssessment {
        CrisisAssessment::detected(
            session_id,
            severity,
            vec!["hopelessness".into()],
            Confidence::new(0.9),
            Utc::now(),
        )
    }

    fn controller(resources: Arc<dyn CrisisResourcePort>) -> (CrisisController, Arc<InMemoryAuditSink>) {
        let audit = Arc::new(InMemoryAuditSink::new());
        let controller = CrisisController::new(
            resources,
            audit.clone(),
            Arc::new(EventBus::default()),
            Arc::new(SystemClock),
            CrisisConfig::default(),
        );
        (controller, audit)
    }

    #[tokio::test]
    async fn test_engage_suspends_and_provides_static_fallback() {
        let (controller, audit) = controller(Arc::new(FailingResourcePort));
        let mut session = running_session();
        let sid = session.id();
        let engagement = controller
            .engage(&mut session, &assessment(sid, CrisisSeverity::High))
            .await
            .expect("engage");

        match engagement {
            CrisisEngagement::Suspended { resources } => {
                // The static bundle stands in when the lookup fails.
                assert_eq!(resources.region, "default");
                assert!(!resources.contacts.is_empty());
            }
            CrisisEngagement::Elevated => panic!("expected suspension"),
        }
        assert_eq!(session.safety_level(), SafetyLevel::Crisis);
        assert!(controller.is_suspended(session.id()));
        assert_eq!(controller.phase(session.id()), InterventionPhase::Monitoring);
        // Triggered, ResourcesProvided, Monitoring all audited.
        assert_eq!(audit.len(), 3);
    }

    #[tokio::test]
    async fn test_sub_floor_assessment_elevates_without_suspension() {
        let (controller, audit) = controller(Arc::new(FailingResourcePort));
        let mut session = running_session();
        let sid = session.id();
        let engagement = controller
            .engage(&mut session, &assessment(sid, CrisisSeverity::Low))
            .await
            .expect("engage");

        assert!(matches!(engagement, CrisisEngagement::Elevated));
        assert_eq!(session.safety_level(), SafetyLevel::Elevated);
        assert!(!controller.is_suspended(session.id()));
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_requires_authorization() {
        let (controller, _audit) = controller(Arc::new(FailingResourcePort));
        let mut session = running_session();
        let sid = session.id();
        controller
            .engage(&mut session, &assessment(sid, CrisisSeverity::Severe))
            .await
            .expect("engage");

        let err = controller
            .resolve(
                &mut session,
                ResolutionSignal {
                    authorized_by: "  ".into(),
                    note: None,
                },
            )
            .await
            .expect_err("unauthorized");
        assert!(matches!(err, CrisisError::Unauthorized));
        assert!(controller.is_suspended(session.id()));
    }

    #[tokio::test]
    async fn test_resolve_then_retrigger() {
        let bundle = CrisisConfig::default().static_bundle;
        let (controller, _audit) = controller(Arc::new(StubResourcePort::new(bundle)));
        let mut session = running_session();
        let sid = session.id();
        controller
            .engage(&mut session, &assessment(sid, CrisisSeverity::High))
            .await
            .expect("engage");
        controller
            .resolve(
                &mut session,
                ResolutionSignal {
                    authorized_by: "facilitator-7".into(),
                    note: Some("user confirmed safe".into()),
                },
            )
            .await
            .expect("resolve");

        assert_eq!(session.safety_level(), SafetyLevel::Standard);
        assert!(!controller.is_suspended(session.id()));

        // A later crisis re-enters the state machine from Resolved.
        controller
            .engage(&mut session, &assessment(sid, CrisisSeverity::Moderate))
            .await
            .expect("re-engage");
        assert!(controller.is_suspended(session.id()));
    }

    #[tokio::test]
    async fn test_redetection_during_monitoring_reprovides_resources() {
        let bundle = CrisisConfig::default().static_bundle;
        let (controller, audit) = controller(Arc::new(StubResourcePort::new(bundle)));
        let mut session = running_session();
        let sid = session.id();
        controller
            .engage(&mut session, &assessment(sid, CrisisSeverity::High))
            .await
            .expect("engage");
        assert_eq!(controller.phase(sid), InterventionPhase::Monitoring);

        // Renewed distress while the intervention is active gets resources
        // again instead of a phase-transition error.
        let second = assessment(sid, CrisisSeverity::Severe);
        let engagement = controller
            .engage(&mut session, &second)
            .await
            .expect("re-engage during monitoring");
        match engagement {
            CrisisEngagement::Suspended { resources } => {
                assert!(!resources.contacts.is_empty());
            }
            CrisisEngagement::Elevated => panic!("expected suspension"),
        }
        assert_eq!(controller.phase(sid), InterventionPhase::Monitoring);
        assert_eq!(session.safety_level(), SafetyLevel::Crisis);
        // Three engagement transitions plus the audited re-detection.
        assert_eq!(audit.len(), 4);
    }

    #[tokio::test]
    async fn test_resolve_without_active_intervention_fails() {
        let (controller, _audit) = controller(Arc::new(FailingResourcePort));
        let mut session = running_session();
        let err = controller
            .resolve(
                &mut session,
                ResolutionSignal {
                    authorized_by: "facilitator-7".into(),
                    note: None,
                },
            )
            .await
            .expect_err("not active");
        assert!(matches!(err, CrisisError::NotActive(_)));
    }
}
