//! SQLite session store
//!
//! One row per session holding the full record, plus a `meta` table for the
//! process-wide schema marker.

mod schema;

pub use schema::*;

use crate::engine::{SessionRef, SessionStore};
use crate::error::{DialogError, DialogResult};
use crate::session::StoredSession;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DbError> for DialogError {
    fn from(e: DbError) -> Self {
        DialogError::Store(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ==================== Session Operations ====================

    pub fn get_session(&self, session: &SessionRef) -> DbResult<Option<StoredSession>> {
        let conn = self.conn.lock().unwrap();
        let session = conn
            .query_row(
                "SELECT session_id, channel, state_name, context_blob, active_at
                 FROM sessions WHERE channel = ?1 AND session_id = ?2",
                params![session.channel, session.session_id],
                |row| {
                    Ok(StoredSession {
                        session_id: row.get(0)?,
                        channel: row.get(1)?,
                        state_name: row.get(2)?,
                        context_blob: row.get(3)?,
                        active_at: row
                            .get::<_, Option<String>>(4)?
                            .as_deref()
                            .map(parse_datetime),
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Insert or fully overwrite a session record
    pub fn upsert_session(&self, session: &StoredSession) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (session_id, channel, state_name, context_blob, active_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(channel, session_id) DO UPDATE SET
                state_name = excluded.state_name,
                context_blob = excluded.context_blob,
                active_at = excluded.active_at,
                updated_at = excluded.updated_at",
            params![
                session.session_id,
                session.channel,
                session.state_name,
                session.context_blob,
                session.active_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Returns whether a row was removed
    pub fn delete_session(&self, session: &SessionRef) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM sessions WHERE channel = ?1 AND session_id = ?2",
            params![session.channel, session.session_id],
        )?;
        Ok(removed > 0)
    }

    /// Every session, most recently updated first
    pub fn list_session_summaries(&self) -> DbResult<Vec<SessionSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, channel, state_name, active_at, updated_at
             FROM sessions ORDER BY updated_at DESC, session_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SessionSummary {
                session_id: row.get(0)?,
                channel: row.get(1)?,
                state_name: row.get(2)?,
                active_at: row
                    .get::<_, Option<String>>(3)?
                    .as_deref()
                    .map(parse_datetime),
                updated_at: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Meta Operations ====================

    pub fn get_meta(&self, key: &str) -> DbResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

impl SessionStore for Database {
    fn load(&self, session: &SessionRef) -> DialogResult<Option<StoredSession>> {
        Ok(self.get_session(session)?)
    }

    fn save(&self, session: &StoredSession) -> DialogResult<()> {
        Ok(self.upsert_session(session)?)
    }

    fn clear(&self, session: &SessionRef) -> DialogResult<()> {
        if !self.delete_session(session)? {
            tracing::debug!(session = %session, "Nothing stored to clear");
        }
        Ok(())
    }

    fn schema_version(&self) -> DialogResult<Option<String>> {
        Ok(self.get_meta(SCHEMA_VERSION_KEY)?)
    }

    fn set_schema_version(&self, version: &str) -> DialogResult<()> {
        Ok(self.set_meta(SCHEMA_VERSION_KEY, version)?)
    }

    fn list_sessions(&self) -> DialogResult<Vec<SessionRef>> {
        Ok(self
            .list_session_summaries()?
            .into_iter()
            .map(|s| SessionRef::new(s.channel, s.session_id))
            .collect())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
