//! Domain entities.

pub mod choice;
pub mod scene;
pub mod session;
pub mod validation;

pub use choice::{
    Choice, ChoiceType, Consequence, ConsequenceTrigger, QueuedConsequence, ValidationStatus,
    VariableChange, VariableDelta,
};
pub use scene::{SceneContext, SceneDefinition, SceneLifecycle, SceneType};
pub use session::{CompletionReason, SafetyLevel, Session, SessionStatus};
pub use validation::{
    AuditRecord, CrisisAssessment, CrisisSeverity, InterventionEvent, InterventionPhase,
    ValidationResult,
};
