//! Registry of live bridge sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::{BridgeError, Result};
use crate::session::{SessionHandle, SessionSnapshot};

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub total_created: u64,
    pub total_closed: u64,
    pub failed_sessions: u64,
}

/// Sessions by id. Lookups never block on a session's lifecycle lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    failed_sessions: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; an id already in use is rejected
    pub fn register(&self, handle: Arc<SessionHandle>) -> Result<()> {
        let id = handle.id().to_string();
        match self.sessions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BridgeError::signaling(format!(
                "session {} is already registered",
                id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                self.total_created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Registered session {}", id);
                Ok(())
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Look a session up, failing with `SessionNotFound`
    pub fn require(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        self.get(session_id)
            .ok_or_else(|| BridgeError::session_not_found(session_id))
    }

    pub fn unregister(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.remove(session_id).map(|(_, handle)| handle);
        if removed.is_some() {
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Unregistered session {}", session_id);
        }
        removed
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All handles, for shutdown
    pub fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Count a session that ended through an error
    pub fn increment_failed(&self) {
        self.failed_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.sessions.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            failed_sessions: self.failed_sessions.load(Ordering::Relaxed),
        }
    }

    /// Snapshots of every session. Handles are cloned out of the map first so
    /// no shard lock is held while awaiting a session lock.
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for handle in self.handles() {
            snapshots.push(handle.lock().await.snapshot());
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }
}
