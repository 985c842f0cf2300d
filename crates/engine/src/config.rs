//! Engine configuration.
//!
//! All thresholds, deadlines, and weights live in one immutable struct passed
//! at construction. There is no module-level mutable state; changing a
//! threshold means building a new engine. Defaults are tuned for a 200ms
//! aggregate validation budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use solace_domain::{ChoiceType, CrisisSeverity};

use crate::infrastructure::circuit_breaker::BreakerConfig;
use crate::infrastructure::event_bus::EventBusConfig;
use crate::infrastructure::ports::{ContactEntry, ResourceBundle};
use crate::infrastructure::resilient_generator::RetryConfig;

/// Safety pipeline thresholds and deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Aggregate wall-clock budget for one validation call
    pub validation_deadline_ms: u64,
    /// A rule/bias report below this score fails the check
    pub check_floor: f64,
    /// Choice safety scores below this floor resolve to SafetyConcern
    pub safety_floor: f64,
    /// Choice alignment scores below this floor resolve to TherapeuticMismatch
    pub alignment_floor: f64,
    /// Crisis-scanner confidence at or above this produces a CrisisAssessment
    pub crisis_threshold: f64,
    /// Crisis-scanner score at or above which an assessment is Severe
    pub severity_severe_floor: f64,
    /// Score floor for High severity
    pub severity_high_floor: f64,
    /// Score floor for Moderate severity; anything below maps to Low
    pub severity_moderate_floor: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            validation_deadline_ms: 200,
            check_floor: 0.5,
            safety_floor: 0.6,
            alignment_floor: 0.4,
            crisis_threshold: 0.7,
            severity_severe_floor: 0.85,
            severity_high_floor: 0.6,
            severity_moderate_floor: 0.35,
        }
    }
}

impl SafetyConfig {
    pub fn validation_deadline(&self) -> Duration {
        Duration::from_millis(self.validation_deadline_ms)
    }

    /// Maps a crisis-scanner score to its severity band.
    pub fn severity_for_score(&self, score: f64) -> CrisisSeverity {
        if score >= self.severity_severe_floor {
            CrisisSeverity::Severe
        } else if score >= self.severity_high_floor {
            CrisisSeverity::High
        } else if score >= self.severity_moderate_floor {
            CrisisSeverity::Moderate
        } else {
            CrisisSeverity::Low
        }
    }
}

/// Crisis escalation policy and the static last-resort resource bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisConfig {
    /// Assessments at or above this severity trigger intervention;
    /// below it the session moves to Elevated without suspension
    pub escalation_floor: CrisisSeverity,
    /// Choice types that may still reach Valid while safety level is crisis
    pub allowed_choice_types: Vec<ChoiceType>,
    /// Region label used for resource lookup
    pub region: String,
    /// Returned when the resource provider lookup fails; resource provision
    /// must never fail open
    pub static_bundle: ResourceBundle,
}

impl Default for CrisisConfig {
    fn default() -> Self {
        Self {
            escalation_floor: CrisisSeverity::Moderate,
            allowed_choice_types: vec![
                ChoiceType::GroundingExercise,
                ChoiceType::RequestSupport,
                ChoiceType::Reflection,
                ChoiceType::EndSession,
            ],
            region: "default".into(),
            static_bundle: ResourceBundle {
                region: "default".into(),
                crisis_kind: "general".into(),
                contacts: vec![ContactEntry {
                    name: "Crisis support line".into(),
                    instruction: "Call or text 988".into(),
                    availability: "24/7".into(),
                }],
            },
        }
    }
}

/// Weights for the scene engagement score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementWeights {
    pub interaction_weight: f64,
    pub time_weight: f64,
    /// Seconds of scene time that count as one unit of the time term
    pub time_scale_secs: f64,
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self {
            interaction_weight: 0.7,
            time_weight: 0.3,
            time_scale_secs: 60.0,
        }
    }
}

impl EngagementWeights {
    /// Weighted function of interaction count and elapsed time.
    pub fn score(&self, interactions: u32, duration_secs: f64) -> f64 {
        self.interaction_weight * f64::from(interactions)
            + self.time_weight * (duration_secs / self.time_scale_secs)
    }
}

/// Therapeutic-alignment scorer weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentWeights {
    /// Weight of tag overlap with the scene's therapeutic focus
    pub overlap_weight: f64,
    /// Weight of the choice type's base affinity for the scene type
    pub type_weight: f64,
    /// Dominant-emotion intensity above which grounding/support choices
    /// receive the distress bonus
    pub distress_intensity: f64,
    pub distress_bonus: f64,
}

impl Default for AlignmentWeights {
    fn default() -> Self {
        Self {
            overlap_weight: 0.6,
            type_weight: 0.4,
            distress_intensity: 0.7,
            distress_bonus: 0.2,
        }
    }
}

/// Session lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Paused sessions older than this complete with reason Expired
    pub max_idle_secs: u64,
    /// Sweep interval of the background idle monitor
    pub monitor_interval_secs: u64,
    /// Consecutive fail-closed validations (no rule fallback available)
    /// before the session enters Error
    pub max_hard_validation_failures: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_idle_secs: 30 * 60,
            monitor_interval_secs: 60,
            max_hard_validation_failures: 3,
        }
    }
}

impl SessionPolicy {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

/// Serializable breaker settings, converted to [`BreakerConfig`] at wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_secs: 30,
            cooldown_secs: 60,
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            window: Duration::from_secs(self.window_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

/// Serializable event-bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusSettings {
    pub history_limit: usize,
    pub subscriber_timeout_ms: u64,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            subscriber_timeout_ms: 250,
        }
    }
}

impl EventBusSettings {
    pub fn to_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            history_limit: self.history_limit,
            subscriber_timeout: Duration::from_millis(self.subscriber_timeout_ms),
        }
    }
}

/// Pre-approved substitute content for fail-closed paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSettings {
    /// Body of the always-safe content unit substituted when validation
    /// cannot complete normally
    pub content_body: String,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            content_body:
                "Let's take a quiet moment together. Notice your breath, and when you're ready, \
                 we can continue."
                    .into(),
        }
    }
}

/// Top-level immutable engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub safety: SafetyConfig,
    pub crisis: CrisisConfig,
    pub engagement: EngagementWeights,
    pub alignment: AlignmentWeights,
    pub session: SessionPolicy,
    pub breaker: BreakerSettings,
    pub event_bus: EventBusSettings,
    pub retry: RetryConfig,
    pub fallback: FallbackSettings,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Loads overrides from `SOLACE_*` environment variables on top of the
    /// defaults. Unparseable values fall back silently, matching startup
    /// behavior of the rest of the stack.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.safety.validation_deadline_ms = env_parse(
            "SOLACE_VALIDATION_DEADLINE_MS",
            config.safety.validation_deadline_ms,
        );
        config.safety.safety_floor = env_parse("SOLACE_SAFETY_FLOOR", config.safety.safety_floor);
        config.safety.alignment_floor =
            env_parse("SOLACE_ALIGNMENT_FLOOR", config.safety.alignment_floor);
        config.safety.crisis_threshold =
            env_parse("SOLACE_CRISIS_THRESHOLD", config.safety.crisis_threshold);
        config.session.max_idle_secs =
            env_parse("SOLACE_MAX_IDLE_SECS", config.session.max_idle_secs);
        config.session.monitor_interval_secs = env_parse(
            "SOLACE_MONITOR_INTERVAL_SECS",
            config.session.monitor_interval_secs,
        );
        config.breaker.failure_threshold = env_parse(
            "SOLACE_BREAKER_FAILURE_THRESHOLD",
            config.breaker.failure_threshold,
        );
        config.breaker.cooldown_secs =
            env_parse("SOLACE_BREAKER_COOLDOWN_SECS", config.breaker.cooldown_secs);
        config.event_bus.history_limit =
            env_parse("SOLACE_EVENT_HISTORY_LIMIT", config.event_bus.history_limit);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engagement_score_weighting() {
        let weights = EngagementWeights {
            interaction_weight: 0.5,
            time_weight: 0.5,
            time_scale_secs: 60.0,
        };
        // 4 interactions over 2 minutes: 0.5*4 + 0.5*2 = 3.0
        let score = weights.score(4, 120.0);
        assert!((score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_defaults_round_trip_through_serde() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: EngineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.safety.validation_deadline_ms, 200);
        assert_eq!(back.crisis.escalation_floor, CrisisSeverity::Moderate);
    }

    #[test]
    fn test_severity_bands_follow_configured_floors() {
        let mut safety = SafetyConfig::default();
        assert_eq!(safety.severity_for_score(0.9), CrisisSeverity::Severe);
        assert_eq!(safety.severity_for_score(0.7), CrisisSeverity::High);
        assert_eq!(safety.severity_for_score(0.4), CrisisSeverity::Moderate);
        assert_eq!(safety.severity_for_score(0.1), CrisisSeverity::Low);

        safety.severity_severe_floor = 0.5;
        assert_eq!(safety.severity_for_score(0.6), CrisisSeverity::Severe);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"safety":{"validation_deadline_ms":50,"check_floor":0.5,"safety_floor":0.6,"alignment_floor":0.4,"crisis_threshold":0.9}}"#)
                .expect("deserialize");
        assert_eq!(config.safety.validation_deadline_ms, 50);
        assert_eq!(config.session.max_hard_validation_failures, 3);
    }
}
