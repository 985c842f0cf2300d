//! In-process typed publish/subscribe backbone.
//!
//! Fan-out to all subscribers of an event kind, FIFO per publisher. Each
//! subscriber gets its own dispatch worker fed by an unbounded channel, so a
//! slow subscriber never stalls the publisher or its peers. Each delivery runs
//! under a per-subscriber timeout; on expiry the delivery is dropped and
//! logged. Handler panics are isolated and logged. A bounded history ring of
//! recent events is retained for debugging and audit, not replay.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use solace_domain::{EngineEvent, EventKind};

/// Configuration for bus behavior
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Number of recent events retained for debugging/audit
    pub history_limit: usize,
    /// Per-delivery handler budget; expired deliveries are dropped
    pub subscriber_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            subscriber_timeout: Duration::from_millis(250),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    /// `None` subscribes to every kind.
    kinds: Option<HashSet<EventKind>>,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

/// In-process event bus.
pub struct EventBus {
    config: EventBusConfig,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    history: Mutex<VecDeque<EngineEvent>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            subscribers: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<EngineEvent>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes a handler to the given kinds (empty slice = all kinds).
    ///
    /// The handler runs on a dedicated worker task; deliveries arrive in
    /// publish order and each one is bounded by the subscriber timeout.
    pub fn subscribe<F, Fut>(&self, kinds: &[EventKind], handler: F) -> SubscriptionId
    where
        F: Fn(EngineEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineEvent>();
        let timeout = self.config.subscriber_timeout;

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let kind = event.kind();
                let task = tokio::spawn(handler(event));
                let abort = task.abort_handle();
                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        tracing::error!(
                            subscription_id = id.0,
                            event_kind = %kind,
                            "Subscriber handler panicked; continuing with next delivery"
                        );
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        abort.abort();
                        tracing::warn!(
                            subscription_id = id.0,
                            event_kind = %kind,
                            timeout_ms = timeout.as_millis() as u64,
                            "Subscriber handler timed out; delivery dropped"
                        );
                    }
                }
            }
        });

        let kinds = if kinds.is_empty() {
            None
        } else {
            Some(kinds.iter().copied().collect())
        };
        self.lock_subscribers().insert(id, Subscriber { kinds, tx });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock_subscribers().remove(&id).is_none() {
            tracing::debug!(subscription_id = id.0, "Unsubscribe for unknown subscription");
        }
    }

    /// Publishes an event to all matching subscribers. Never blocks on
    /// subscriber progress.
    pub fn publish(&self, event: EngineEvent) {
        {
            let mut history = self.lock_history();
            history.push_back(event.clone());
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        let kind = event.kind();
        let mut dead = Vec::new();
        {
            let subscribers = self.lock_subscribers();
            for (id, subscriber) in subscribers.iter() {
                let wants = subscriber
                    .kinds
                    .as_ref()
                    .map(|set| set.contains(&kind))
                    .unwrap_or(true);
                if !wants {
                    continue;
                }
                if subscriber.tx.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            tracing::debug!(subscription_id = id.0, "Removing closed subscriber");
            self.lock_subscribers().remove(&id);
        }
    }

    /// Snapshot of the retained history, oldest first.
    pub fn history(&self) -> Vec<EngineEvent> {
        self.lock_history().iter().cloned().collect()
    }

    /// History filtered to one kind, oldest first.
    pub fn history_of(&self, kind: EventKind) -> Vec<EngineEvent> {
        self.lock_history()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}
