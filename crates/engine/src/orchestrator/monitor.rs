//! Background idle-session monitor.
//!
//! Sweeps the orchestrator's tracked sessions on a fixed interval and expires
//! paused sessions whose idle time exceeds the configured maximum. The task
//! runs until its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;

pub struct IdleMonitor {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl IdleMonitor {
    /// Spawns the sweep task.
    pub fn spawn(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Idle monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        for session_id in orchestrator.tracked_sessions() {
                            orchestrator.expire_if_idle(session_id).await;
                        }
                    }
                }
            }
        });
        Self { handle, cancel }
    }

    /// Signals the sweep task to stop and waits for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Idle monitor task panicked");
            }
        }
    }
}
