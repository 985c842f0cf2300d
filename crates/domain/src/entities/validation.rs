//! Append-only audit records: validation results, crisis assessments, and
//! crisis-intervention transitions.
//!
//! These are created once, never mutated, and appended to the audit sink in
//! completion order. Each carries its own timestamp so causal order can be
//! reconstructed under concurrent load.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{AssessmentId, ContentId, InterventionId, SessionId, ValidationId};
use crate::value_objects::Confidence;

/// The atomic output of the safety pipeline for one content unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub id: ValidationId,
    pub subject_id: ContentId,
    pub passed: bool,
    pub confidence: Confidence,
    pub triggered_rules: Vec<String>,
    pub elapsed: Duration,
    /// The pipeline could not complete normally and substituted the
    /// rule-filter-only verdict (or blocked outright).
    pub fallback_used: bool,
    /// The aggregate deadline expired before all checks reported.
    pub deadline_expired: bool,
    pub completed_at: DateTime<Utc>,
}

impl ValidationResult {
    /// A fail-closed result: content blocked, fallback recorded.
    pub fn blocked(
        subject_id: ContentId,
        triggered_rules: Vec<String>,
        elapsed: Duration,
        deadline_expired: bool,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ValidationId::new(),
            subject_id,
            passed: false,
            confidence: Confidence::MAX,
            triggered_rules,
            elapsed,
            fallback_used: true,
            deadline_expired,
            completed_at,
        }
    }
}

/// Ordered crisis severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisSeverity {
    Low,
    Moderate,
    High,
    Severe,
}

impl std::fmt::Display for CrisisSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
            Self::Severe => write!(f, "severe"),
        }
    }
}

impl std::str::FromStr for CrisisSeverity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "moderate" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            "severe" => Ok(Self::Severe),
            other => Err(DomainError::Parse(format!("unknown severity: {other}"))),
        }
    }
}

/// Produced when the crisis-indicator check fires above threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisAssessment {
    pub id: AssessmentId,
    pub session_id: SessionId,
    pub detected: bool,
    pub severity: CrisisSeverity,
    /// Ordered: most significant indicator first.
    pub indicators: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub confidence: Confidence,
    pub assessed_at: DateTime<Utc>,
}

impl CrisisAssessment {
    pub fn detected(
        session_id: SessionId,
        severity: CrisisSeverity,
        indicators: Vec<String>,
        confidence: Confidence,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssessmentId::new(),
            session_id,
            detected: true,
            severity,
            indicators,
            recommended_actions: Vec::new(),
            confidence,
            assessed_at,
        }
    }

    pub fn with_recommended_actions(mut self, actions: Vec<String>) -> Self {
        self.recommended_actions = actions;
        self
    }
}

/// Crisis controller state machine.
///
/// `Idle → Triggered → ResourcesProvided → Monitoring → Resolved`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterventionPhase {
    #[default]
    Idle,
    Triggered,
    ResourcesProvided,
    Monitoring,
    Resolved,
}

impl InterventionPhase {
    pub fn can_transition_to(self, next: InterventionPhase) -> bool {
        use InterventionPhase::*;
        matches!(
            (self, next),
            (Idle, Triggered)
                | (Triggered, ResourcesProvided)
                | (ResourcesProvided, Monitoring)
                | (Monitoring, Resolved)
                // A resolved session may re-enter crisis later.
                | (Resolved, Triggered)
        )
    }
}

impl std::fmt::Display for InterventionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Triggered => write!(f, "triggered"),
            Self::ResourcesProvided => write!(f, "resources_provided"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// One crisis-controller transition, audited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionEvent {
    pub id: InterventionId,
    pub session_id: SessionId,
    pub assessment_id: Option<AssessmentId>,
    pub from: InterventionPhase,
    pub to: InterventionPhase,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl InterventionEvent {
    pub fn new(
        session_id: SessionId,
        assessment_id: Option<AssessmentId>,
        from: InterventionPhase,
        to: InterventionPhase,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InterventionId::new(),
            session_id,
            assessment_id,
            from,
            to,
            note: None,
            occurred_at,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Sum type accepted by the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AuditRecord {
    Validation(ValidationResult),
    Crisis(CrisisAssessment),
    Intervention(InterventionEvent),
}

impl AuditRecord {
    pub fn record_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Crisis(_) => "crisis",
            Self::Intervention(_) => "intervention",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Validation(v) => v.completed_at,
            Self::Crisis(c) => c.assessed_at,
            Self::Intervention(i) => i.occurred_at,
        }
    }
}
