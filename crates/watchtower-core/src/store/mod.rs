//! Persistence seam for watch history and operator data.
//!
//! The scheduler and the HTTP surface talk to [`EventStore`]; the shipped
//! implementations are [`SqliteStore`] for production and [`MemoryStore`]
//! for tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use watchtower_types::error::StoreError;
use watchtower_types::models::WatchKind;

/// A persisted watch session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub handle: String,
    pub kind: WatchKind,
    pub owner: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// "alerted", "errored", or "stopped" once the session is closed.
    pub outcome: Option<String>,
}

/// Endpoint stats persisted across restarts.
#[derive(Debug, Clone)]
pub struct PersistedEndpointStats {
    pub url: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_response_time: f64,
}

/// Aggregate counters for the stats surface.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StoreSummary {
    pub sessions: u64,
    pub open_sessions: u64,
    pub checks: u64,
    pub transitions: u64,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    // Authorization.
    async fn is_authorized(&self, user_id: i64) -> Result<bool, StoreError>;
    async fn add_user(&self, user_id: i64) -> Result<(), StoreError>;
    async fn remove_user(&self, user_id: i64) -> Result<bool, StoreError>;
    async fn list_users(&self) -> Result<Vec<i64>, StoreError>;

    // Watch sessions.
    async fn open_session(
        &self,
        handle: &str,
        kind: WatchKind,
        owner: i64,
    ) -> Result<i64, StoreError>;
    async fn close_session(&self, session_id: i64, outcome: &str) -> Result<(), StoreError>;
    async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, StoreError>;

    // Per-check and transition history.
    async fn record_check(
        &self,
        session_id: i64,
        status: &str,
        endpoint: Option<&str>,
        response_time: f64,
    ) -> Result<(), StoreError>;
    async fn record_transition(&self, handle: &str, kind: WatchKind) -> Result<(), StoreError>;

    // Endpoint stats persistence.
    async fn save_endpoint_stats(
        &self,
        stats: &[PersistedEndpointStats],
    ) -> Result<(), StoreError>;
    async fn load_endpoint_stats(&self) -> Result<Vec<PersistedEndpointStats>, StoreError>;

    // Aggregates and retention.
    async fn summary(&self) -> Result<StoreSummary, StoreError>;
    /// Delete check history older than `days`. Returns rows removed.
    async fn prune_checks(&self, days: u32) -> Result<u64, StoreError>;
}
