//! Content units and narrative variable values.
//!
//! A [`ContentUnit`] is the atom the safety pipeline validates: generator
//! output, a scene's declared content, a user choice's raw text, or the
//! pre-approved fallback substitute.

use serde::{Deserialize, Serialize};

use crate::ids::ContentId;

/// Where a content unit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Generator,
    SceneDefinition,
    UserChoice,
    Fallback,
}

impl std::fmt::Display for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generator => write!(f, "generator"),
            Self::SceneDefinition => write!(f, "scene_definition"),
            Self::UserChoice => write!(f, "user_choice"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// One unit of user-visible (or user-submitted) content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUnit {
    pub id: ContentId,
    pub source: ContentSource,
    pub body: String,
}

impl ContentUnit {
    pub fn new(source: ContentSource, body: impl Into<String>) -> Self {
        Self {
            id: ContentId::new(),
            source,
            body: body.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ContentSource::Fallback
    }
}

/// Typed value for a narrative variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl VariableValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_source_is_marked() {
        let unit = ContentUnit::new(ContentSource::Fallback, "take a slow breath");
        assert!(unit.is_fallback());
        assert!(!ContentUnit::new(ContentSource::Generator, "x").is_fallback());
    }

    #[test]
    fn test_variable_value_accessors() {
        assert_eq!(VariableValue::Number(3.0).as_number(), Some(3.0));
        assert_eq!(VariableValue::Flag(true).as_flag(), Some(true));
        assert_eq!(VariableValue::Text("a".into()).as_number(), None);
    }
}
