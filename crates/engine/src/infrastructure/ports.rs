//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete
//! types. Ports exist for:
//! - The content generator (opaque model behind a typed contract)
//! - The three safety classifiers (rule filter, bias scanner, crisis scanner)
//! - Session persistence (could swap in-memory -> any key-value store)
//! - Crisis resource lookup (external collaborator, no session side effects)
//! - The audit sink (best-effort durability, never a transaction partner)
//! - Clock (for testing)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use solace_domain::{
    AuditRecord, Confidence, ContentUnit, SafetyScore, SceneType, Session, SessionId,
};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generator timed out")]
    Timeout,
    #[error("Generator unavailable: {0}")]
    Unavailable(String),
    #[error("Generator rate limited")]
    RateLimited,
    #[error("Generator returned invalid output: {0}")]
    InvalidOutput(String),
}

impl GenerationError {
    /// Transient errors are worth retrying; invalid output is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_) | Self::RateLimited)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Classifier backend unavailable: {0}")]
    Unavailable(String),
    #[error("Classifier timed out")]
    Timeout,
    #[error("Classifier internal error: {0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Backing store unreachable: {0}")]
    Unreachable(String),
    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource lookup failed: {0}")]
    LookupFailed(String),
}

// =============================================================================
// Infrastructure Types
// =============================================================================

/// Which safety check a [`ContentCheckPort`] implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    RuleFilter,
    BiasScanner,
    CrisisScanner,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuleFilter => write!(f, "rule_filter"),
            Self::BiasScanner => write!(f, "bias_scanner"),
            Self::CrisisScanner => write!(f, "crisis_scanner"),
        }
    }
}

/// One classifier's verdict on one content unit.
///
/// For the rule filter and bias scanner, `score` is a safety score (1.0 =
/// fully safe). For the crisis scanner, `score` is crisis intensity and
/// `confidence` is what the pipeline compares against the crisis threshold.
/// Triggered rules (including bias-mitigation suggestions) are surfaced for
/// human review, never applied automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub kind: CheckKind,
    pub score: SafetyScore,
    pub confidence: Confidence,
    pub triggered_rules: Vec<String>,
}

impl CheckReport {
    pub fn clean(kind: CheckKind) -> Self {
        Self {
            kind,
            score: SafetyScore::MAX,
            confidence: Confidence::MAX,
            triggered_rules: Vec::new(),
        }
    }
}

/// Prompt context handed to the generator alongside a session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub intent: String,
    pub scene_type: SceneType,
    pub therapeutic_focus: Vec<String>,
}

/// One contact entry in a crisis resource bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEntry {
    pub name: String,
    pub instruction: String,
    pub availability: String,
}

/// Contact information returned to the user during a crisis.
///
/// External lookup data, never generated content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBundle {
    pub region: String,
    pub crisis_kind: String,
    pub contacts: Vec<ContactEntry>,
}

// =============================================================================
// Ports
// =============================================================================

/// Opaque content generator. Failure is a typed error, never a partial result.
#[async_trait]
pub trait GeneratorPort: Send + Sync {
    async fn generate(
        &self,
        session: &Session,
        prompt: &PromptContext,
    ) -> Result<ContentUnit, GenerationError>;
}

/// One safety classifier. Callable concurrently, independently time-boundable.
#[async_trait]
pub trait ContentCheckPort: Send + Sync {
    fn kind(&self) -> CheckKind;
    async fn check(&self, content: &ContentUnit) -> Result<CheckReport, CheckError>;
}

/// Session persistence with optimistic concurrency: `save` rejects a session
/// whose version does not advance past the stored one.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn load(&self, id: SessionId) -> Result<Option<Session>, StoreError>;
    async fn save(&self, session: &Session) -> Result<(), StoreError>;
}

/// Pure external lookup of crisis contact resources.
#[async_trait]
pub trait CrisisResourcePort: Send + Sync {
    async fn resources_for(
        &self,
        region: &str,
        crisis_kind: &str,
    ) -> Result<ResourceBundle, ResourceError>;
}

/// Append-only audit trail. Fire-and-forget from the engine's perspective:
/// implementations log their own failures and never propagate them into the
/// narrative path.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord);
}

/// Wall-clock source, mockable in tests.
#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
