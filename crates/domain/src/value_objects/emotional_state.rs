//! Emotional-state vector for a session.
//!
//! A label-to-intensity mapping (0.0–1.0, clamped). Choices shift intensities
//! through [`EmotionShift`] deltas; the vector never rejects a shift, it
//! saturates at the bounds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single additive adjustment to one emotion label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionShift {
    pub label: String,
    /// Signed delta; the resulting intensity is clamped to [0.0, 1.0].
    pub delta: f64,
}

impl EmotionShift {
    pub fn new(label: impl Into<String>, delta: f64) -> Self {
        Self {
            label: label.into(),
            delta,
        }
    }
}

/// Label → intensity vector, all intensities in [0.0, 1.0].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    levels: HashMap<String, f64>,
}

impl EmotionalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current intensity for a label; absent labels read as 0.0.
    pub fn intensity(&self, label: &str) -> f64 {
        self.levels.get(label).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, label: impl Into<String>, intensity: f64) {
        self.levels.insert(label.into(), intensity.clamp(0.0, 1.0));
    }

    pub fn apply(&mut self, shift: &EmotionShift) {
        let current = self.intensity(&shift.label);
        self.set(shift.label.clone(), current + shift.delta);
    }

    /// The label with the highest intensity, if any intensity is non-zero.
    pub fn dominant(&self) -> Option<(&str, f64)> {
        self.levels
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, v)| (k.as_str(), *v))
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, f64)> {
        self.levels.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_saturates_at_bounds() {
        let mut state = EmotionalState::new();
        state.set("calm", 0.9);
        state.apply(&EmotionShift::new("calm", 0.5));
        assert_eq!(state.intensity("calm"), 1.0);

        state.apply(&EmotionShift::new("calm", -2.0));
        assert_eq!(state.intensity("calm"), 0.0);
    }

    #[test]
    fn test_absent_label_reads_zero() {
        let state = EmotionalState::new();
        assert_eq!(state.intensity("dread"), 0.0);
    }

    #[test]
    fn test_dominant_picks_highest_intensity() {
        let mut state = EmotionalState::new();
        state.set("anxiety", 0.7);
        state.set("hope", 0.3);
        assert_eq!(state.dominant(), Some(("anxiety", 0.7)));
    }
}
