use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::SessionId;

/// A connection currently being captured.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub output_dir: PathBuf,
}

/// Thread-safe record of live sessions and finished-session counts.
///
/// Connection threads register on start and deregister when their session
/// returns, so the listener can report what is in flight without touching
/// any session's state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    active: Arc<RwLock<HashMap<SessionId, ActiveSession>>>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: ActiveSession) {
        let id = session.id.clone();
        let total = {
            let mut active = self.active.write();
            active.insert(id.clone(), session);
            active.len()
        };
        tracing::debug!(session_id = %id, active_sessions = total, "session registered");
    }

    /// Remove a session and count how it ended.
    pub fn finish(&self, id: &SessionId, succeeded: bool) {
        let removed = self.active.write().remove(id);
        if removed.is_none() {
            return;
        }
        let counter = if succeeded { &self.completed } else { &self.failed };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn active(&self) -> Vec<ActiveSession> {
        self.active.read().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Sessions that returned a summary.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Sessions that returned an error.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}
