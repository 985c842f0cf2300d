//! In-memory adapters for the repository and audit ports.
//!
//! Persistent backends are external collaborators; these adapters implement
//! the same contracts for tests and embedded use. The session repo enforces
//! the optimistic-concurrency discipline real backends must honor.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;

use solace_domain::{AuditRecord, Session, SessionId};

use crate::infrastructure::ports::{AuditSink, SessionRepo, StoreError};

/// DashMap-backed session store with version checking.
#[derive(Default)]
pub struct InMemorySessionRepo {
    sessions: DashMap<SessionId, Session>,
}

impl InMemorySessionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepo for InMemorySessionRepo {
    async fn load(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(&id).map(|entry| entry.clone()))
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        match self.sessions.entry(session.id()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let stored = entry.get();
                if stored.version() >= session.version() {
                    return Err(StoreError::VersionConflict {
                        expected: stored.version() + 1,
                        found: session.version(),
                    });
                }
                entry.insert(session.clone());
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(session.clone());
                Ok(())
            }
        }
    }
}

/// Append-only audit log with snapshot access for completeness checks.
#[derive(Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every record appended so far, in completion order.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: AuditRecord) {
        tracing::debug!(
            record_kind = record.record_kind(),
            timestamp = %record.timestamp(),
            "Audit record appended"
        );
        self.lock().push(record);
    }
}
