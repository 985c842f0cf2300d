//! Circuit breaker guarding classifier backends.
//!
//! Rolling-window semantics: the breaker trips when N failures land inside the
//! configured window. It has three states:
//!
//! - **Closed**: normal operation, requests pass through
//! - **Open**: backend failing, requests rejected until the cooldown elapses
//! - **HalfOpen**: cooldown elapsed, the next live call is the health probe

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Configuration for rolling-window breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within `window` that trip the circuit
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted
    pub window: Duration,
    /// Duration the circuit stays open before admitting a probe
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Current state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct InternalState {
    state: BreakerState,
    /// Failure timestamps inside the rolling window
    failures: VecDeque<Instant>,
    /// When the circuit was opened (only valid when state is Open)
    opened_at: Option<Instant>,
    /// A half-open probe has been admitted and not yet reported
    probe_in_flight: bool,
}

/// Thread-safe rolling-window circuit breaker.
pub struct RollingBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<InternalState>,
}

impl RollingBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(InternalState {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InternalState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a live request may pass through. In half-open, exactly one
    /// probe is admitted; further calls are rejected until it reports.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.failures.clear();
            }
            BreakerState::HalfOpen => {
                tracing::info!(
                    breaker = self.name,
                    "Circuit breaker closing after successful probe"
                );
                inner.state = BreakerState::Closed;
                inner.failures.clear();
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            // A success arriving while open is a late completion; ignore it.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.failures.push_back(now);
                Self::evict_expired(&mut inner.failures, now, self.config.window);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = self.name,
                        failures = inner.failures.len(),
                        window_secs = self.config.window.as_secs(),
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Circuit breaker opening: failure threshold reached in window"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!(
                    breaker = self.name,
                    "Circuit breaker re-opening after failed probe"
                );
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
            }
            BreakerState::Open => {
                inner.opened_at = Some(now);
            }
        }
    }

    /// Open -> HalfOpen once the cooldown has elapsed.
    fn refresh(&self, inner: &mut InternalState) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.cooldown {
                    tracing::info!(
                        breaker = self.name,
                        "Circuit breaker cooldown elapsed, admitting probe"
                    );
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    fn evict_expired(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = failures.front() {
            if now.duration_since(*oldest) > window {
                failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config(threshold: u32, window_ms: u64, cooldown_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            window: Duration::from_millis(window_ms),
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    #[test]
    fn test_starts_closed() {
        let breaker = RollingBreaker::new("test", BreakerConfig::default());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_trips_at_threshold_within_window() {
        let breaker = RollingBreaker::new("test", config(3, 1000, 60_000));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_failures_outside_window_do_not_trip() {
        let breaker = RollingBreaker::new("test", config(3, 30, 60_000));
        breaker.record_failure();
        breaker.record_failure();
        thread::sleep(Duration::from_millis(50));
        breaker.record_failure();
        // Only one failure remains in the window.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_cooldown_admits_single_probe() {
        let breaker = RollingBreaker::new("test", config(1, 1000, 20));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.allow_request());
        // Probe in flight; no second live call admitted yet.
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_probe_success_closes() {
        let breaker = RollingBreaker::new("test", config(1, 1000, 10));
        breaker.record_failure();
        thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let breaker = RollingBreaker::new("test", config(1, 1000, 10));
        breaker.record_failure();
        thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_clears_window() {
        let breaker = RollingBreaker::new("test", config(3, 60_000, 60_000));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
