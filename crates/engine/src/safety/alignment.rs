//! Therapeutic alignment scoring.
//!
//! Deterministic and synchronous: alignment never calls a backend, so it can
//! run inside the choice validation path without touching the deadline
//! budget. The score weighs tag overlap with the scene's therapeutic focus
//! against the choice type's base affinity for the scene type, with a bonus
//! for grounding/support choices while the player's dominant emotion runs
//! high.

use solace_domain::{AlignmentScore, Choice, ChoiceType, EmotionalState, SceneType};

use crate::config::AlignmentWeights;

pub struct AlignmentScorer {
    weights: AlignmentWeights,
}

impl AlignmentScorer {
    pub fn new(weights: AlignmentWeights) -> Self {
        Self { weights }
    }

    pub fn score(
        &self,
        choice: &Choice,
        scene_type: SceneType,
        therapeutic_focus: &[String],
        emotional_state: &EmotionalState,
    ) -> AlignmentScore {
        let overlap = tag_overlap(choice.therapeutic_tags(), therapeutic_focus);
        let affinity = type_affinity(choice.choice_type(), scene_type);
        let mut score =
            self.weights.overlap_weight * overlap + self.weights.type_weight * affinity;

        if let Some((_, intensity)) = emotional_state.dominant() {
            if intensity >= self.weights.distress_intensity
                && matches!(
                    choice.choice_type(),
                    ChoiceType::GroundingExercise | ChoiceType::RequestSupport
                )
            {
                score += self.weights.distress_bonus;
            }
        }
        AlignmentScore::new(score)
    }
}

/// Fraction of the scene's focus tags the choice carries. A scene without a
/// declared focus scores every choice neutrally.
fn tag_overlap(tags: &[String], focus: &[String]) -> f64 {
    if focus.is_empty() {
        return 0.5;
    }
    let hits = focus.iter().filter(|f| tags.contains(f)).count();
    hits as f64 / focus.len() as f64
}

fn type_affinity(choice_type: ChoiceType, scene_type: SceneType) -> f64 {
    use ChoiceType::*;
    use SceneType::*;
    match (scene_type, choice_type) {
        (Exploration, Narrative) => 1.0,
        (Exploration, ChoiceType::Dialogue) => 0.6,
        (SceneType::Dialogue, ChoiceType::Dialogue) => 1.0,
        (SceneType::Dialogue, Narrative) => 0.5,
        (TherapeuticMoment, ChoiceType::Reflection) => 1.0,
        (TherapeuticMoment, GroundingExercise) => 0.9,
        (SceneType::Reflection, ChoiceType::Reflection) => 1.0,
        (SceneType::Reflection, Narrative) => 0.4,
        (CrisisResolution, GroundingExercise) => 1.0,
        (CrisisResolution, RequestSupport) => 1.0,
        (CrisisResolution, Narrative) => 0.2,
        // Support and exit choices are always at least moderately apt.
        (_, RequestSupport) => 0.7,
        (_, EndSession) => 0.6,
        (_, GroundingExercise) => 0.6,
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use solace_domain::SceneId;

    fn choice_of(choice_type: ChoiceType, tags: Vec<String>) -> Choice {
        Choice::present(SceneId::new(), "a quiet path", choice_type, Utc::now()).with_tags(tags)
    }

    #[test]
    fn test_full_overlap_scores_high() {
        let scorer = AlignmentScorer::new(AlignmentWeights::default());
        let focus = vec!["self_compassion".to_string()];
        let choice = choice_of(ChoiceType::Reflection, focus.clone());
        let score = scorer.score(
            &choice,
            SceneType::Reflection,
            &focus,
            &EmotionalState::default(),
        );
        assert!(score.value() > 0.9);
    }

    #[test]
    fn test_no_overlap_with_mismatched_type_scores_low() {
        let scorer = AlignmentScorer::new(AlignmentWeights::default());
        let focus = vec!["grief_processing".to_string()];
        let choice = choice_of(ChoiceType::Narrative, vec![]);
        let score = scorer.score(
            &choice,
            SceneType::CrisisResolution,
            &focus,
            &EmotionalState::default(),
        );
        assert!(score.value() < 0.2);
    }

    #[test]
    fn test_distress_bonus_for_grounding_choice() {
        let scorer = AlignmentScorer::new(AlignmentWeights::default());
        let mut state = EmotionalState::default();
        state.set("anxiety", 0.9);
        let choice = choice_of(ChoiceType::GroundingExercise, vec![]);
        let calm = scorer.score(
            &choice,
            SceneType::Exploration,
            &[],
            &EmotionalState::default(),
        );
        let distressed = scorer.score(&choice, SceneType::Exploration, &[], &state);
        assert!(distressed.value() > calm.value());
    }

    #[test]
    fn test_exploration_affinity_orders_choice_types() {
        let scorer = AlignmentScorer::new(AlignmentWeights::default());
        let state = EmotionalState::default();
        let score_for = |choice_type| {
            scorer
                .score(
                    &choice_of(choice_type, vec![]),
                    SceneType::Exploration,
                    &[],
                    &state,
                )
                .value()
        };
        // Narrative is the native exploration choice, dialogue sits between
        // it and types with no exploration affinity at all.
        assert!(score_for(ChoiceType::Narrative) > score_for(ChoiceType::Dialogue));
        assert!(score_for(ChoiceType::Dialogue) > score_for(ChoiceType::Reflection));
    }

    #[test]
    fn test_empty_focus_is_neutral() {
        assert!((tag_overlap(&["a".into()], &[]) - 0.5).abs() < 1e-9);
    }
}
