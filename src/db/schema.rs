//! Database schema and row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    channel TEXT NOT NULL,
    session_id TEXT NOT NULL,
    state_name TEXT NOT NULL,
    context_blob TEXT NOT NULL,
    active_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (channel, session_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Key of the process-wide schema marker in `meta`
pub const SCHEMA_VERSION_KEY: &str = "session_schema_version";

/// Listing entry of a stored session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub channel: String,
    pub state_name: String,
    pub active_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
