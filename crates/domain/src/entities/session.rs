//! Session aggregate: one continuous narrative run.
//!
//! Owned exclusively by the orchestrator while live; persisted on every
//! mutating transition so a crash can resume from the last committed state.
//! The `version` counter backs optimistic concurrency at the repository.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::choice::{Consequence, QueuedConsequence, VariableChange};
use crate::error::DomainError;
use crate::ids::{SceneId, SessionId};
use crate::value_objects::{EmotionalState, VariableValue};

/// Safety posture of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    #[default]
    Standard,
    /// A sub-escalation crisis assessment was recorded; no suspension.
    Elevated,
    /// Non-crisis narrative events are suspended.
    Crisis,
}

impl std::fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Elevated => write!(f, "elevated"),
            Self::Crisis => write!(f, "crisis"),
        }
    }
}

impl std::str::FromStr for SafetyLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "elevated" => Ok(Self::Elevated),
            "crisis" => Ok(Self::Crisis),
            other => Err(DomainError::Parse(format!("unknown safety level: {other}"))),
        }
    }
}

/// Why a session completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    GoalsReached,
    Terminated,
    Expired,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GoalsReached => write!(f, "goals_reached"),
            Self::Terminated => write!(f, "terminated"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Session lifecycle state machine.
///
/// `Initializing → Ready → Running → {Paused, Completed, Error} → Shutdown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Ready,
    Running,
    Paused,
    Completed,
    Error,
    Shutdown,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initializing, Ready | Error)
                | (Ready, Running | Completed | Error)
                | (Running, Paused | Completed | Error)
                | (Paused, Running | Completed | Error)
                | (Completed | Error, Shutdown)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Shutdown)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// One continuous narrative run for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: SessionId,
    user_id: String,
    status: SessionStatus,
    safety_level: SafetyLevel,
    current_scene_id: Option<SceneId>,
    scene_history: Vec<SceneId>,
    variables: HashMap<String, VariableValue>,
    emotional_state: EmotionalState,
    /// Delayed consequences waiting for their trigger condition. Persisted so
    /// crash-resume keeps them.
    pending_consequences: Vec<QueuedConsequence>,
    completion_reason: Option<CompletionReason>,
    /// Monotonically increasing; bumped by [`Session::touch`] before every save.
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            status: SessionStatus::Initializing,
            safety_level: SafetyLevel::Standard,
            current_scene_id: None,
            scene_history: Vec::new(),
            variables: HashMap::new(),
            emotional_state: EmotionalState::new(),
            pending_consequences: Vec::new(),
            completion_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // Read-only accessors

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn safety_level(&self) -> SafetyLevel {
        self.safety_level
    }

    pub fn current_scene_id(&self) -> Option<SceneId> {
        self.current_scene_id
    }

    pub fn scene_history(&self) -> &[SceneId] {
        &self.scene_history
    }

    pub fn variables(&self) -> &HashMap<String, VariableValue> {
        &self.variables
    }

    pub fn variable(&self, key: &str) -> Option<&VariableValue> {
        self.variables.get(key)
    }

    pub fn emotional_state(&self) -> &EmotionalState {
        &self.emotional_state
    }

    pub fn emotional_state_mut(&mut self) -> &mut EmotionalState {
        &mut self.emotional_state
    }

    pub fn pending_consequences(&self) -> &[QueuedConsequence] {
        &self.pending_consequences
    }

    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.completion_reason
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // Mutations

    /// Guarded lifecycle transition.
    pub fn transition_to(
        &mut self,
        next: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(format!(
                "session {} cannot move {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(
        &mut self,
        reason: CompletionReason,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(SessionStatus::Completed, now)?;
        self.completion_reason = Some(reason);
        Ok(())
    }

    pub fn set_safety_level(&mut self, level: SafetyLevel, now: DateTime<Utc>) {
        self.safety_level = level;
        self.updated_at = now;
    }

    pub fn set_current_scene(&mut self, scene_id: SceneId, now: DateTime<Utc>) {
        self.current_scene_id = Some(scene_id);
        self.scene_history.push(scene_id);
        self.updated_at = now;
    }

    pub fn clear_current_scene(&mut self, now: DateTime<Utc>) {
        self.current_scene_id = None;
        self.updated_at = now;
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: VariableValue) {
        self.variables.insert(key.into(), value);
    }

    /// Applies one variable change; increments on non-numeric current values
    /// replace them with the delta.
    pub fn apply_variable_change(&mut self, key: &str, change: &VariableChange) {
        match change {
            VariableChange::Set(value) => {
                self.variables.insert(key.to_string(), value.clone());
            }
            VariableChange::Increment(delta) => {
                let current = self
                    .variables
                    .get(key)
                    .and_then(VariableValue::as_number)
                    .unwrap_or(0.0);
                self.variables
                    .insert(key.to_string(), VariableValue::Number(current + delta));
            }
        }
    }

    /// Applies every variable delta and emotion shift a consequence declares.
    pub fn apply_consequence(&mut self, consequence: &Consequence) {
        for delta in &consequence.variable_deltas {
            self.apply_variable_change(&delta.key, &delta.change);
        }
        for shift in &consequence.emotion_shifts {
            self.emotional_state.apply(shift);
        }
    }

    pub fn queue_consequence(&mut self, queued: QueuedConsequence) {
        self.pending_consequences.push(queued);
    }

    /// Removes and returns all queued delayed consequences, preserving order.
    pub fn drain_pending_consequences(&mut self) -> Vec<QueuedConsequence> {
        std::mem::take(&mut self.pending_consequences)
    }

    /// Bumps the optimistic-concurrency version; call once per committed
    /// mutation, immediately before saving.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("user-1", Utc::now())
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let now = Utc::now();
        let mut s = session();
        s.transition_to(SessionStatus::Ready, now).expect("ready");
        s.transition_to(SessionStatus::Running, now).expect("running");
        s.transition_to(SessionStatus::Paused, now).expect("paused");
        s.transition_to(SessionStatus::Running, now).expect("resumed");
        s.complete(CompletionReason::GoalsReached, now).expect("completed");
        s.transition_to(SessionStatus::Shutdown, now).expect("shutdown");
        assert_eq!(s.completion_reason(), Some(CompletionReason::GoalsReached));
    }

    #[test]
    fn test_rejects_illegal_transitions() {
        let now = Utc::now();
        let mut s = session();
        assert!(s.transition_to(SessionStatus::Running, now).is_err());
        assert!(s.transition_to(SessionStatus::Paused, now).is_err());
        // State unchanged after the rejection.
        assert_eq!(s.status(), SessionStatus::Initializing);
    }

    #[test]
    fn test_increment_on_missing_variable_starts_at_zero() {
        let mut s = session();
        s.apply_variable_change("trust", &VariableChange::Increment(2.5));
        assert_eq!(s.variable("trust").and_then(VariableValue::as_number), Some(2.5));
        s.apply_variable_change("trust", &VariableChange::Increment(-1.0));
        assert_eq!(s.variable("trust").and_then(VariableValue::as_number), Some(1.5));
    }

    #[test]
    fn test_scene_history_accumulates() {
        let now = Utc::now();
        let mut s = session();
        let a = SceneId::new();
        let b = SceneId::new();
        s.set_current_scene(a, now);
        s.clear_current_scene(now);
        s.set_current_scene(b, now);
        assert_eq!(s.scene_history(), &[a, b]);
        assert_eq!(s.current_scene_id(), Some(b));
    }

    #[test]
    fn test_touch_bumps_version() {
        let mut s = session();
        assert_eq!(s.version(), 0);
        s.touch(Utc::now());
        s.touch(Utc::now());
        assert_eq!(s.version(), 2);
    }
}
