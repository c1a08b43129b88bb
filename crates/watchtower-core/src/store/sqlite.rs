//! SQLite-backed event store.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use watchtower_types::error::StoreError;
use watchtower_types::models::WatchKind;

use super::{EventStore, PersistedEndpointStats, SessionRecord, StoreSummary};

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Event store over a single sqlite file.
///
/// All statements are short and run under one connection mutex; this store is
/// not a throughput bottleneck at monitoring cadence.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database, used by tests and the `--ephemeral` flag.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handle TEXT NOT NULL,
                kind TEXT NOT NULL,
                owner INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                outcome TEXT
            );
            CREATE TABLE IF NOT EXISTS checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                endpoint TEXT,
                response_time REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_checks_created ON checks (created_at);
            CREATE TABLE IF NOT EXISTS transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handle TEXT NOT NULL,
                kind TEXT NOT NULL,
                detected_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS endpoint_stats (
                url TEXT PRIMARY KEY,
                success_count INTEGER NOT NULL,
                failure_count INTEGER NOT NULL,
                avg_response_time REAL NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(db_err)
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn is_authorized(&self, user_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row("SELECT user_id FROM users WHERE user_id = ?1", params![user_id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    async fn add_user(&self, user_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("INSERT OR IGNORE INTO users (user_id) VALUES (?1)", params![user_id])
            .map_err(db_err)?;
        Ok(())
    }

    async fn remove_user(&self, user_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM users WHERE user_id = ?1", params![user_id])
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    async fn list_users(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT user_id FROM users ORDER BY user_id").map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err)?
            .collect::<Result<Vec<i64>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn open_session(
        &self,
        handle: &str,
        kind: WatchKind,
        owner: i64,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (handle, kind, owner, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![handle, kind.as_str(), owner, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    async fn close_session(&self, session_id: i64, outcome: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE sessions SET ended_at = ?1, outcome = ?2 WHERE id = ?3 AND ended_at IS NULL",
                params![Utc::now().to_rfc3339(), outcome, session_id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound(session_id));
        }
        Ok(())
    }

    async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, handle, kind, owner, started_at, ended_at, outcome
                 FROM sessions ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        rows.into_iter()
            .map(|(id, handle, kind, owner, started, ended, outcome)| {
                Ok(SessionRecord {
                    id,
                    handle,
                    kind: WatchKind::from_str(&kind).map_err(StoreError::Serialization)?,
                    owner,
                    started_at: parse_ts(&started)?,
                    ended_at: ended.as_deref().map(parse_ts).transpose()?,
                    outcome,
                })
            })
            .collect()
    }

    async fn record_check(
        &self,
        session_id: i64,
        status: &str,
        endpoint: Option<&str>,
        response_time: f64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO checks (session_id, status, endpoint, response_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, status, endpoint, response_time, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_transition(&self, handle: &str, kind: WatchKind) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transitions (handle, kind, detected_at) VALUES (?1, ?2, ?3)",
            params![handle, kind.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_endpoint_stats(
        &self,
        stats: &[PersistedEndpointStats],
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        for s in stats {
            conn.execute(
                "INSERT INTO endpoint_stats (url, success_count, failure_count, avg_response_time, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url) DO UPDATE SET
                    success_count = excluded.success_count,
                    failure_count = excluded.failure_count,
                    avg_response_time = excluded.avg_response_time,
                    updated_at = excluded.updated_at",
                params![
                    s.url,
                    s.success_count as i64,
                    s.failure_count as i64,
                    s.avg_response_time,
                    now
                ],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn load_endpoint_stats(&self) -> Result<Vec<PersistedEndpointStats>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT url, success_count, failure_count, avg_response_time FROM endpoint_stats")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PersistedEndpointStats {
                    url: row.get(0)?,
                    success_count: row.get::<_, i64>(1)?.max(0) as u64,
                    failure_count: row.get::<_, i64>(2)?.max(0) as u64,
                    avg_response_time: row.get(3)?,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<u64, StoreError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
                .map_err(db_err)
        };
        Ok(StoreSummary {
            sessions: count("SELECT COUNT(*) FROM sessions")?,
            open_sessions: count("SELECT COUNT(*) FROM sessions WHERE ended_at IS NULL")?,
            checks: count("SELECT COUNT(*) FROM checks")?,
            transitions: count("SELECT COUNT(*) FROM transitions")?,
        })
    }

    async fn prune_checks(&self, days: u32) -> Result<u64, StoreError> {
        let cutoff = (Utc::now() - Duration::days(i64::from(days))).to_rfc3339();
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM checks WHERE created_at < ?1", params![cutoff])
            .map_err(db_err)?;
        Ok(removed as u64)
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{raw}': {e}")))
}
