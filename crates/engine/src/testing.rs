//! Test doubles for the engine's ports.
//!
//! Used by the crate's own tests and by embedders wiring the engine without
//! real backends.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use solace_domain::{ContentSource, ContentUnit, Session};

use crate::infrastructure::ports::{
    CheckError, CheckKind, CheckReport, ClockPort, ContentCheckPort, CrisisResourcePort,
    GenerationError, GeneratorPort, PromptContext, ResourceBundle, ResourceError,
};

/// Scriptable safety check: fixed report, optional delay, optional error.
pub struct StubCheck {
    kind: CheckKind,
    report: CheckReport,
    delay: Duration,
    error: Option<fn() -> CheckError>,
}

impl StubCheck {
    /// A check that passes cleanly.
    pub fn clean(kind: CheckKind) -> Self {
        Self {
            kind,
            report: CheckReport::clean(kind),
            delay: Duration::ZERO,
            error: None,
        }
    }

    /// A check that reports a low safety score with the given rules.
    pub fn flagged(kind: CheckKind, score: f64, triggered_rules: Vec<String>) -> Self {
        let mut stub = Self::clean(kind);
        stub.report.score = score.into();
        stub.report.triggered_rules = triggered_rules;
        stub
    }

    /// A crisis scanner reporting the given intensity and confidence.
    pub fn crisis_firing(score: f64, confidence: f64, indicators: Vec<String>) -> Self {
        let mut stub = Self::flagged(CheckKind::CrisisScanner, score, indicators);
        stub.report.confidence = confidence.into();
        stub
    }

    /// A check whose backend always errors.
    pub fn failing(kind: CheckKind) -> Self {
        let mut stub = Self::clean(kind);
        stub.error = Some(|| CheckError::Unavailable("stubbed outage".into()));
        stub
    }

    pub fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.report.confidence = confidence.into();
        self
    }
}

#[async_trait]
impl ContentCheckPort for StubCheck {
    fn kind(&self) -> CheckKind {
        self.kind
    }

    async fn check(&self, _content: &ContentUnit) -> Result<CheckReport, CheckError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.error {
            Some(make) => Err(make()),
            None => Ok(self.report.clone()),
        }
    }
}

/// Crisis scanner that fires only when the content body contains a marker
/// phrase; everything else reports clean with zero crisis confidence.
pub struct KeywordCrisisCheck {
    marker: String,
    report: CheckReport,
}

impl KeywordCrisisCheck {
    pub fn new(marker: impl Into<String>, score: f64, confidence: f64, indicators: Vec<String>) -> Self {
        let mut report = CheckReport::clean(CheckKind::CrisisScanner);
        report.score = score.into();
        report.confidence = confidence.into();
        report.triggered_rules = indicators;
        Self {
            marker: marker.into(),
            report,
        }
    }
}

#[async_trait]
impl ContentCheckPort for KeywordCrisisCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::CrisisScanner
    }

    async fn check(&self, content: &ContentUnit) -> Result<CheckReport, CheckError> {
        if content.body.contains(&self.marker) {
            Ok(self.report.clone())
        } else {
            let mut clean = CheckReport::clean(CheckKind::CrisisScanner);
            clean.confidence = 0.0.into();
            Ok(clean)
        }
    }
}

/// Generator returning a fixed body, counting calls.
pub struct StubGenerator {
    body: String,
    calls: AtomicU32,
}

impl StubGenerator {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeneratorPort for StubGenerator {
    async fn generate(
        &self,
        _session: &Session,
        _prompt: &PromptContext,
    ) -> Result<ContentUnit, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ContentUnit::new(ContentSource::Generator, self.body.clone()))
    }
}

/// Generator whose backend is permanently down.
pub struct FailingGenerator;

#[async_trait]
impl GeneratorPort for FailingGenerator {
    async fn generate(
        &self,
        _session: &Session,
        _prompt: &PromptContext,
    ) -> Result<ContentUnit, GenerationError> {
        Err(GenerationError::Unavailable("stubbed outage".into()))
    }
}

/// Resource provider that always fails, forcing the static bundle path.
pub struct FailingResourcePort;

#[async_trait]
impl CrisisResourcePort for FailingResourcePort {
    async fn resources_for(
        &self,
        _region: &str,
        _crisis_kind: &str,
    ) -> Result<ResourceBundle, ResourceError> {
        Err(ResourceError::LookupFailed("stubbed outage".into()))
    }
}

/// Resource provider returning a fixed bundle.
pub struct StubResourcePort {
    bundle: ResourceBundle,
}

impl StubResourcePort {
    pub fn new(bundle: ResourceBundle) -> Self {
        Self { bundle }
    }
}

#[async_trait]
impl CrisisResourcePort for StubResourcePort {
    async fn resources_for(
        &self,
        _region: &str,
        _crisis_kind: &str,
    ) -> Result<ResourceBundle, ResourceError> {
        Ok(self.bundle.clone())
    }
}

/// Real wall clock under a test-friendly name, for wiring stubs.
pub struct SystemClockForTests;

impl ClockPort for SystemClockForTests {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
