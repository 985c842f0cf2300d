//! Value objects shared across entities.

pub mod content;
pub mod emotional_state;
pub mod scores;

pub use content::{ContentSource, ContentUnit, VariableValue};
pub use emotional_state::{EmotionShift, EmotionalState};
pub use scores::{AlignmentScore, Confidence, SafetyScore};
