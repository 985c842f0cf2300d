//! Resilient generator wrapper with exponential backoff retry.
//!
//! Wraps any GeneratorPort implementation with retry logic for transient
//! failures. Retryability is decided by the typed error variant, never by
//! message inspection.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solace_domain::{ContentUnit, Session};

use crate::infrastructure::ports::{GenerationError, GeneratorPort, PromptContext};

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_retries: u32,
    /// Base delay in milliseconds before first retry
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) for randomizing delays to prevent thundering herd
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            jitter_factor: 0.2,
        }
    }
}

/// Wrapper that adds retry logic to any generator backend.
pub struct ResilientGenerator {
    inner: Arc<dyn GeneratorPort>,
    config: RetryConfig,
}

impl ResilientGenerator {
    pub fn new(inner: Arc<dyn GeneratorPort>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Calculate delay for a given attempt number using exponential backoff with jitter
    fn calculate_delay(&self, attempt: u32) -> u64 {
        let base = self.config.base_delay_ms;
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.config.max_delay_ms);

        let jitter_range = (capped as f64 * self.config.jitter_factor) as i64;
        if jitter_range > 0 {
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped as i64 + jitter).max(0) as u64
        } else {
            capped
        }
    }
}

#[async_trait]
impl GeneratorPort for ResilientGenerator {
    async fn generate(
        &self,
        session: &Session,
        prompt: &PromptContext,
    ) -> Result<ContentUnit, GenerationError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.generate(session, prompt).await {
                Ok(content) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempt = attempt + 1,
                            session_id = %session.id(),
                            "Generator call succeeded after retry"
                        );
                    }
                    return Ok(content);
                }
                Err(e) => {
                    if attempt < self.config.max_retries && e.is_transient() {
                        let delay = self.calculate_delay(attempt + 1);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.max_retries,
                            delay_ms = delay,
                            error = %e,
                            session_id = %session.id(),
                            "Generator call failed, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    } else if !e.is_transient() {
                        tracing::error!(
                            error = %e,
                            session_id = %session.id(),
                            "Generator call failed with non-retryable error"
                        );
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or(GenerationError::Timeout);
        tracing::error!(
            attempts = self.config.max_retries + 1,
            error = %error,
            session_id = %session.id(),
            "Generator call failed after all retry attempts"
        );
        Err(error)
    }
}
