extern crate self as solace_domain;

pub mod entities;
pub mod error;
pub mod events;
pub mod ids;
pub mod value_objects;

// Re-export all entities (explicit list in entities/mod.rs)
pub use entities::{
    AuditRecord, Choice, ChoiceType, CompletionReason, Consequence, ConsequenceTrigger,
    CrisisAssessment, CrisisSeverity, InterventionEvent, InterventionPhase, QueuedConsequence,
    SafetyLevel, SceneContext, SceneDefinition, SceneLifecycle, SceneType, Session, SessionStatus,
    ValidationResult, ValidationStatus, VariableChange, VariableDelta,
};

pub use error::DomainError;
pub use events::{EngineEvent, EventKind};
pub use ids::{
    AssessmentId, ChoiceId, ContentId, InterventionId, SceneId, SessionId, ValidationId,
};
pub use value_objects::{
    AlignmentScore, Confidence, ContentSource, ContentUnit, EmotionShift, EmotionalState,
    SafetyScore, VariableValue,
};
