//! Engine events.
//!
//! Immutable, serializable value objects published on the event bus.
//! Downstream systems (UI, analytics) may subscribe without being part of the
//! core's correctness guarantees. Every event carries its session id and a
//! timestamp; [`EventKind`] is the discriminant used for subscription
//! filtering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{CompletionReason, CrisisSeverity, SessionStatus};
use crate::ids::{AssessmentId, ChoiceId, SceneId, SessionId, ValidationId};

/// Discriminant for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SceneEntered,
    SceneExited,
    ChoicePresented,
    ChoiceApplied,
    ValidationCompleted,
    CrisisTriggered,
    CrisisResolved,
    SessionStateChanged,
    SessionSuspended,
    SessionCompleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SceneEntered => write!(f, "scene_entered"),
            Self::SceneExited => write!(f, "scene_exited"),
            Self::ChoicePresented => write!(f, "choice_presented"),
            Self::ChoiceApplied => write!(f, "choice_applied"),
            Self::ValidationCompleted => write!(f, "validation_completed"),
            Self::CrisisTriggered => write!(f, "crisis_triggered"),
            Self::CrisisResolved => write!(f, "crisis_resolved"),
            Self::SessionStateChanged => write!(f, "session_state_changed"),
            Self::SessionSuspended => write!(f, "session_suspended"),
            Self::SessionCompleted => write!(f, "session_completed"),
        }
    }
}

/// Event for significant engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineEvent {
    SceneEntered {
        session_id: SessionId,
        scene_id: SceneId,
        at: DateTime<Utc>,
    },
    SceneExited {
        session_id: SessionId,
        scene_id: SceneId,
        duration_secs: f64,
        engagement_score: f64,
        at: DateTime<Utc>,
    },
    ChoicePresented {
        session_id: SessionId,
        scene_id: SceneId,
        choice_id: ChoiceId,
        at: DateTime<Utc>,
    },
    ChoiceApplied {
        session_id: SessionId,
        choice_id: ChoiceId,
        at: DateTime<Utc>,
    },
    ValidationCompleted {
        session_id: SessionId,
        validation_id: ValidationId,
        passed: bool,
        fallback_used: bool,
        at: DateTime<Utc>,
    },
    CrisisTriggered {
        session_id: SessionId,
        assessment_id: AssessmentId,
        severity: CrisisSeverity,
        at: DateTime<Utc>,
    },
    CrisisResolved {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    SessionStateChanged {
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    },
    SessionSuspended {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    /// Final metrics flush at completion.
    SessionCompleted {
        session_id: SessionId,
        reason: CompletionReason,
        scenes_visited: usize,
        total_duration_secs: f64,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SceneEntered { .. } => EventKind::SceneEntered,
            Self::SceneExited { .. } => EventKind::SceneExited,
            Self::ChoicePresented { .. } => EventKind::ChoicePresented,
            Self::ChoiceApplied { .. } => EventKind::ChoiceApplied,
            Self::ValidationCompleted { .. } => EventKind::ValidationCompleted,
            Self::CrisisTriggered { .. } => EventKind::CrisisTriggered,
            Self::CrisisResolved { .. } => EventKind::CrisisResolved,
            Self::SessionStateChanged { .. } => EventKind::SessionStateChanged,
            Self::SessionSuspended { .. } => EventKind::SessionSuspended,
            Self::SessionCompleted { .. } => EventKind::SessionCompleted,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SceneEntered { session_id, .. }
            | Self::SceneExited { session_id, .. }
            | Self::ChoicePresented { session_id, .. }
            | Self::ChoiceApplied { session_id, .. }
            | Self::ValidationCompleted { session_id, .. }
            | Self::CrisisTriggered { session_id, .. }
            | Self::CrisisResolved { session_id, .. }
            | Self::SessionStateChanged { session_id, .. }
            | Self::SessionSuspended { session_id, .. }
            | Self::SessionCompleted { session_id, .. } => *session_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SceneEntered { at, .. }
            | Self::SceneExited { at, .. }
            | Self::ChoicePresented { at, .. }
            | Self::ChoiceApplied { at, .. }
            | Self::ValidationCompleted { at, .. }
            | Self::CrisisTriggered { at, .. }
            | Self::CrisisResolved { at, .. }
            | Self::SessionStateChanged { at, .. }
            | Self::SessionSuspended { at, .. }
            | Self::SessionCompleted { at, .. } => *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let event = EngineEvent::CrisisResolved {
            session_id: SessionId::new(),
            at: Utc::now(),
        };
        assert_eq!(event.kind(), EventKind::CrisisResolved);
    }

    #[test]
    fn test_session_id_extraction() {
        let session_id = SessionId::new();
        let event = EngineEvent::SessionSuspended {
            session_id,
            at: Utc::now(),
        };
        assert_eq!(event.session_id(), session_id);
    }
}
