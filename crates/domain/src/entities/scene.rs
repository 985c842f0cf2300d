//! Scene definition and the session-scoped scene context.
//!
//! A [`SceneDefinition`] is immutable once built and may be reused across
//! sessions. A [`SceneContext`] is the tracked instance: it belongs to exactly
//! one session, carries entry/exit timestamps and the validation that admitted
//! it, and is never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{SceneId, SessionId, ValidationId};
use crate::value_objects::ContentUnit;

/// Narrative kind of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneType {
    Exploration,
    Dialogue,
    TherapeuticMoment,
    Reflection,
    /// The only scene type admissible while a session is in crisis.
    CrisisResolution,
}

impl std::fmt::Display for SceneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exploration => write!(f, "exploration"),
            Self::Dialogue => write!(f, "dialogue"),
            Self::TherapeuticMoment => write!(f, "therapeutic_moment"),
            Self::Reflection => write!(f, "reflection"),
            Self::CrisisResolution => write!(f, "crisis_resolution"),
        }
    }
}

impl std::str::FromStr for SceneType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exploration" => Ok(Self::Exploration),
            "dialogue" => Ok(Self::Dialogue),
            "therapeutic_moment" => Ok(Self::TherapeuticMoment),
            "reflection" => Ok(Self::Reflection),
            "crisis_resolution" => Ok(Self::CrisisResolution),
            other => Err(DomainError::Parse(format!("unknown scene type: {other}"))),
        }
    }
}

/// Immutable narrative unit. Mutations require a new definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDefinition {
    id: SceneId,
    scene_type: SceneType,
    content: ContentUnit,
    therapeutic_focus: Vec<String>,
}

impl SceneDefinition {
    pub fn new(scene_type: SceneType, content: ContentUnit) -> Self {
        Self {
            id: SceneId::new(),
            scene_type,
            content,
            therapeutic_focus: Vec::new(),
        }
    }

    pub fn with_focus(mut self, tags: Vec<String>) -> Self {
        self.therapeutic_focus = tags;
        self
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn scene_type(&self) -> SceneType {
        self.scene_type
    }

    pub fn content(&self) -> &ContentUnit {
        &self.content
    }

    pub fn therapeutic_focus(&self) -> &[String] {
        &self.therapeutic_focus
    }
}

/// Lifecycle of a tracked scene instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneLifecycle {
    Active,
    Completed,
}

/// The session-scoped tracked instance of a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneContext {
    scene_id: SceneId,
    session_id: SessionId,
    /// Validation that admitted this scene's content.
    admitted_by: ValidationId,
    lifecycle: SceneLifecycle,
    interaction_count: u32,
    entered_at: DateTime<Utc>,
    exited_at: Option<DateTime<Utc>>,
}

impl SceneContext {
    pub fn enter(
        scene_id: SceneId,
        session_id: SessionId,
        admitted_by: ValidationId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            scene_id,
            session_id,
            admitted_by,
            lifecycle: SceneLifecycle::Active,
            interaction_count: 0,
            entered_at: now,
            exited_at: None,
        }
    }

    pub fn scene_id(&self) -> SceneId {
        self.scene_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn admitted_by(&self) -> ValidationId {
        self.admitted_by
    }

    pub fn lifecycle(&self) -> SceneLifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == SceneLifecycle::Active
    }

    pub fn interaction_count(&self) -> u32 {
        self.interaction_count
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    pub fn exited_at(&self) -> Option<DateTime<Utc>> {
        self.exited_at
    }

    pub fn record_interaction(&mut self) {
        self.interaction_count = self.interaction_count.saturating_add(1);
    }

    /// Marks the context completed and returns the elapsed duration in
    /// seconds.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<f64, DomainError> {
        if self.lifecycle != SceneLifecycle::Active {
            return Err(DomainError::invalid_transition(format!(
                "scene context {} already completed",
                self.scene_id
            )));
        }
        self.lifecycle = SceneLifecycle::Completed;
        self.exited_at = Some(now);
        Ok(self.duration_secs(now))
    }

    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        let end = self.exited_at.unwrap_or(now);
        (end - self.entered_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::ContentSource;
    use chrono::Duration;

    #[test]
    fn test_context_completes_once() {
        let now = Utc::now();
        let mut ctx = SceneContext::enter(SceneId::new(), SessionId::new(), ValidationId::new(), now);
        assert!(ctx.is_active());
        let later = now + Duration::seconds(90);
        let duration = ctx.complete(later).expect("completes");
        assert!((duration - 90.0).abs() < 0.001);
        assert!(ctx.complete(later).is_err());
    }

    #[test]
    fn test_interaction_count_saturates() {
        let mut ctx = SceneContext::enter(
            SceneId::new(),
            SessionId::new(),
            ValidationId::new(),
            Utc::now(),
        );
        ctx.record_interaction();
        ctx.record_interaction();
        assert_eq!(ctx.interaction_count(), 2);
    }

    #[test]
    fn test_definition_focus_builder() {
        let def = SceneDefinition::new(
            SceneType::TherapeuticMoment,
            ContentUnit::new(ContentSource::SceneDefinition, "a quiet garden"),
        )
        .with_focus(vec!["grounding".into(), "self_compassion".into()]);
        assert_eq!(def.therapeutic_focus().len(), 2);
        assert_eq!(def.scene_type(), SceneType::TherapeuticMoment);
    }
}
