//! In-memory event store for tests.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use watchtower_types::error::StoreError;
use watchtower_types::models::WatchKind;

use super::{EventStore, PersistedEndpointStats, SessionRecord, StoreSummary};

#[derive(Debug, Clone)]
struct CheckRow {
    created_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    users: BTreeSet<i64>,
    sessions: Vec<SessionRecord>,
    checks: Vec<CheckRow>,
    transitions: Vec<(String, WatchKind)>,
    endpoint_stats: Vec<PersistedEndpointStats>,
    next_session_id: i64,
}

/// Volatile store with the same observable behavior as the sqlite one.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitions recorded so far, oldest first.
    pub fn transitions(&self) -> Vec<(String, WatchKind)> {
        self.inner.lock().transitions.clone()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn is_authorized(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.lock().users.contains(&user_id))
    }

    async fn add_user(&self, user_id: i64) -> Result<(), StoreError> {
        self.inner.lock().users.insert(user_id);
        Ok(())
    }

    async fn remove_user(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.lock().users.remove(&user_id))
    }

    async fn list_users(&self) -> Result<Vec<i64>, StoreError> {
        Ok(self.inner.lock().users.iter().copied().collect())
    }

    async fn open_session(
        &self,
        handle: &str,
        kind: WatchKind,
        owner: i64,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_session_id += 1;
        let id = inner.next_session_id;
        inner.sessions.push(SessionRecord {
            id,
            handle: handle.to_string(),
            kind,
            owner,
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
        });
        Ok(id)
    }

    async fn close_session(&self, session_id: i64, outcome: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.ended_at.is_none())
            .ok_or(StoreError::SessionNotFound(session_id))?;
        session.ended_at = Some(Utc::now());
        session.outcome = Some(outcome.to_string());
        Ok(())
    }

    async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.sessions.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn record_check(
        &self,
        _session_id: i64,
        _status: &str,
        _endpoint: Option<&str>,
        _response_time: f64,
    ) -> Result<(), StoreError> {
        self.inner.lock().checks.push(CheckRow { created_at: Utc::now() });
        Ok(())
    }

    async fn record_transition(&self, handle: &str, kind: WatchKind) -> Result<(), StoreError> {
        self.inner.lock().transitions.push((handle.to_string(), kind));
        Ok(())
    }

    async fn save_endpoint_stats(
        &self,
        stats: &[PersistedEndpointStats],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for s in stats {
            match inner.endpoint_stats.iter_mut().find(|e| e.url == s.url) {
                Some(existing) => *existing = s.clone(),
                None => inner.endpoint_stats.push(s.clone()),
            }
        }
        Ok(())
    }

    async fn load_endpoint_stats(&self) -> Result<Vec<PersistedEndpointStats>, StoreError> {
        Ok(self.inner.lock().endpoint_stats.clone())
    }

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let inner = self.inner.lock();
        Ok(StoreSummary {
            sessions: inner.sessions.len() as u64,
            open_sessions: inner.sessions.iter().filter(|s| s.ended_at.is_none()).count() as u64,
            checks: inner.checks.len() as u64,
            transitions: inner.transitions.len() as u64,
        })
    }

    async fn prune_checks(&self, days: u32) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let mut inner = self.inner.lock();
        let before = inner.checks.len();
        inner.checks.retain(|c| c.created_at >= cutoff);
        Ok((before - inner.checks.len()) as u64)
    }
}
