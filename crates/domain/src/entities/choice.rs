//! Choice entity and its validation state machine.
//!
//! A choice is created when it is presented to the user, finalized exactly
//! once by validation, and immutable after that. Corrections require a new
//! choice. Consequences are declared up front; delayed ones are queued on the
//! session and flushed at the next scene entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{ChoiceId, SceneId};
use crate::value_objects::{
    AlignmentScore, ContentSource, ContentUnit, EmotionShift, SafetyScore, VariableValue,
};

/// Declared kind of a user choice.
///
/// The crisis allow-list (configuration) restricts which of these may reach
/// `Valid` while a session's safety level is crisis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceType {
    Narrative,
    Dialogue,
    Reflection,
    GroundingExercise,
    RequestSupport,
    EndSession,
}

impl std::fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Narrative => write!(f, "narrative"),
            Self::Dialogue => write!(f, "dialogue"),
            Self::Reflection => write!(f, "reflection"),
            Self::GroundingExercise => write!(f, "grounding_exercise"),
            Self::RequestSupport => write!(f, "request_support"),
            Self::EndSession => write!(f, "end_session"),
        }
    }
}

impl std::str::FromStr for ChoiceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "narrative" => Ok(Self::Narrative),
            "dialogue" => Ok(Self::Dialogue),
            "reflection" => Ok(Self::Reflection),
            "grounding_exercise" | "grounding" => Ok(Self::GroundingExercise),
            "request_support" | "support" => Ok(Self::RequestSupport),
            "end_session" | "end" => Ok(Self::EndSession),
            other => Err(DomainError::Parse(format!("unknown choice type: {other}"))),
        }
    }
}

/// Validation state machine per choice.
///
/// `Presented → Validating → {Valid, Invalid, RequiresConfirmation,
/// SafetyConcern, TherapeuticMismatch} → Applied | Rejected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Presented,
    Validating,
    Valid,
    Invalid,
    RequiresConfirmation,
    SafetyConcern,
    TherapeuticMismatch,
    Applied,
    Rejected,
}

impl ValidationStatus {
    pub fn can_transition_to(self, next: ValidationStatus) -> bool {
        use ValidationStatus::*;
        matches!(
            (self, next),
            (Presented, Validating)
                | (
                    Validating,
                    Valid | Invalid | RequiresConfirmation | SafetyConcern | TherapeuticMismatch
                )
                // RequiresConfirmation may be applied after an explicit
                // caller confirmation.
                | (Valid | RequiresConfirmation, Applied)
                | (
                    Valid | Invalid | RequiresConfirmation | SafetyConcern | TherapeuticMismatch,
                    Rejected
                )
        )
    }

    /// Statuses in which the choice will never be applied.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Rejected)
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Presented => write!(f, "presented"),
            Self::Validating => write!(f, "validating"),
            Self::Valid => write!(f, "valid"),
            Self::Invalid => write!(f, "invalid"),
            Self::RequiresConfirmation => write!(f, "requires_confirmation"),
            Self::SafetyConcern => write!(f, "safety_concern"),
            Self::TherapeuticMismatch => write!(f, "therapeutic_mismatch"),
            Self::Applied => write!(f, "applied"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A single change to one narrative variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableChange {
    Set(VariableValue),
    /// Adds to the current numeric value; non-numeric current values are
    /// replaced by the delta.
    Increment(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDelta {
    pub key: String,
    pub change: VariableChange,
}

impl VariableDelta {
    pub fn set(key: impl Into<String>, value: VariableValue) -> Self {
        Self {
            key: key.into(),
            change: VariableChange::Set(value),
        }
    }

    pub fn increment(key: impl Into<String>, amount: f64) -> Self {
        Self {
            key: key.into(),
            change: VariableChange::Increment(amount),
        }
    }
}

/// When a consequence fires relative to the choice being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsequenceTrigger {
    Immediate,
    OnNextSceneEntry,
}

/// A declared narrative consequence of a choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consequence {
    pub trigger: ConsequenceTrigger,
    pub variable_deltas: Vec<VariableDelta>,
    pub emotion_shifts: Vec<EmotionShift>,
}

impl Consequence {
    pub fn immediate() -> Self {
        Self {
            trigger: ConsequenceTrigger::Immediate,
            variable_deltas: Vec::new(),
            emotion_shifts: Vec::new(),
        }
    }

    pub fn on_next_scene_entry() -> Self {
        Self {
            trigger: ConsequenceTrigger::OnNextSceneEntry,
            variable_deltas: Vec::new(),
            emotion_shifts: Vec::new(),
        }
    }

    pub fn with_delta(mut self, delta: VariableDelta) -> Self {
        self.variable_deltas.push(delta);
        self
    }

    pub fn with_shift(mut self, shift: EmotionShift) -> Self {
        self.emotion_shifts.push(shift);
        self
    }
}

/// A delayed consequence queued on the session, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedConsequence {
    pub choice_id: ChoiceId,
    pub consequence: Consequence,
}

/// A user-submitted action referencing the scene in which it was presented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    id: ChoiceId,
    scene_id: SceneId,
    content: ContentUnit,
    choice_type: ChoiceType,
    /// Tags the author declared for therapeutic-alignment scoring.
    therapeutic_tags: Vec<String>,
    consequences: Vec<Consequence>,
    safety_score: Option<SafetyScore>,
    alignment_score: Option<AlignmentScore>,
    status: ValidationStatus,
    presented_at: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
}

impl Choice {
    pub fn present(
        scene_id: SceneId,
        raw_content: impl Into<String>,
        choice_type: ChoiceType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ChoiceId::new(),
            scene_id,
            content: ContentUnit::new(ContentSource::UserChoice, raw_content),
            choice_type,
            therapeutic_tags: Vec::new(),
            consequences: Vec::new(),
            safety_score: None,
            alignment_score: None,
            status: ValidationStatus::Presented,
            presented_at: now,
            finalized_at: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.therapeutic_tags = tags;
        self
    }

    pub fn with_consequence(mut self, consequence: Consequence) -> Self {
        self.consequences.push(consequence);
        self
    }

    // Read-only accessors

    pub fn id(&self) -> ChoiceId {
        self.id
    }

    pub fn scene_id(&self) -> SceneId {
        self.scene_id
    }

    pub fn content(&self) -> &ContentUnit {
        &self.content
    }

    pub fn choice_type(&self) -> ChoiceType {
        self.choice_type
    }

    pub fn therapeutic_tags(&self) -> &[String] {
        &self.therapeutic_tags
    }

    pub fn consequences(&self) -> &[Consequence] {
        &self.consequences
    }

    pub fn safety_score(&self) -> Option<SafetyScore> {
        self.safety_score
    }

    pub fn alignment_score(&self) -> Option<AlignmentScore> {
        self.alignment_score
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn presented_at(&self) -> DateTime<Utc> {
        self.presented_at
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    // State machine transitions

    pub fn begin_validation(&mut self) -> Result<(), DomainError> {
        self.transition(ValidationStatus::Validating)
    }

    /// Finalizes validation with the computed scores. The choice is immutable
    /// afterwards except for the Applied/Rejected step.
    pub fn finalize(
        &mut self,
        outcome: ValidationStatus,
        safety: SafetyScore,
        alignment: AlignmentScore,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition(outcome)?;
        self.safety_score = Some(safety);
        self.alignment_score = Some(alignment);
        self.finalized_at = Some(now);
        Ok(())
    }

    pub fn mark_applied(&mut self) -> Result<(), DomainError> {
        self.transition(ValidationStatus::Applied)
    }

    pub fn mark_rejected(&mut self) -> Result<(), DomainError> {
        self.transition(ValidationStatus::Rejected)
    }

    fn transition(&mut self, next: ValidationStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(format!(
                "choice {} cannot move {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presented() -> Choice {
        Choice::present(SceneId::new(), "look around", ChoiceType::Narrative, Utc::now())
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut choice = presented();
        choice.begin_validation().expect("validating");
        choice
            .finalize(
                ValidationStatus::Valid,
                SafetyScore::new(0.9),
                AlignmentScore::new(0.8),
                Utc::now(),
            )
            .expect("valid");
        choice.mark_applied().expect("applied");
        assert_eq!(choice.status(), ValidationStatus::Applied);
        assert!(choice.finalized_at().is_some());
    }

    #[test]
    fn test_applied_choice_cannot_be_reapplied() {
        let mut choice = presented();
        choice.begin_validation().expect("validating");
        choice
            .finalize(
                ValidationStatus::Valid,
                SafetyScore::MAX,
                AlignmentScore::MAX,
                Utc::now(),
            )
            .expect("valid");
        choice.mark_applied().expect("applied");
        assert!(matches!(
            choice.mark_applied(),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_safety_concern_cannot_be_applied() {
        let mut choice = presented();
        choice.begin_validation().expect("validating");
        choice
            .finalize(
                ValidationStatus::SafetyConcern,
                SafetyScore::new(0.1),
                AlignmentScore::new(0.9),
                Utc::now(),
            )
            .expect("finalized");
        assert!(choice.mark_applied().is_err());
        choice.mark_rejected().expect("rejected");
    }

    #[test]
    fn test_requires_confirmation_applies_after_confirmation() {
        let mut choice = presented();
        choice.begin_validation().expect("validating");
        choice
            .finalize(
                ValidationStatus::RequiresConfirmation,
                SafetyScore::new(0.8),
                AlignmentScore::new(0.5),
                Utc::now(),
            )
            .expect("finalized");
        choice.mark_applied().expect("applied after confirmation");
        assert_eq!(choice.status(), ValidationStatus::Applied);
    }

    #[test]
    fn test_cannot_finalize_without_validating() {
        let mut choice = presented();
        assert!(choice
            .finalize(
                ValidationStatus::Valid,
                SafetyScore::MAX,
                AlignmentScore::MAX,
                Utc::now()
            )
            .is_err());
    }
}
