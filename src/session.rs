//! Session aggregate and its versioned persisted form
//!
//! The context is written as a tagged snapshot. A snapshot whose schema tag
//! differs from [`SCHEMA_VERSION`] is never migrated: the session restarts.

use crate::context::{Context, EntityValue, HistoryEntry};
use crate::error::{DialogError, DialogResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schema of persisted sessions written by this build
pub const SCHEMA_VERSION: &str = "dialog/1";

/// Persisted context, tagged with the schema it was written with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum SessionSnapshot {
    #[serde(rename = "dialog/1")]
    V1 {
        counter: u64,
        entities: BTreeMap<String, Vec<EntityValue>>,
        history: Vec<HistoryEntry>,
    },
}

/// Why a stored snapshot could not be resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Written under another schema
    VersionMismatch { stored: String },
    /// Not decodable at all
    Corrupt(String),
}

impl SessionSnapshot {
    pub fn capture(context: &Context) -> Self {
        Self::V1 {
            counter: context.counter(),
            entities: context.entities().clone(),
            history: context.history().to_vec(),
        }
    }

    pub fn into_context(self, max_depth: usize) -> Context {
        match self {
            Self::V1 {
                counter,
                entities,
                history,
            } => Context::from_parts(counter, entities, history, max_depth),
        }
    }

    pub fn encode(context: &Context) -> DialogResult<String> {
        serde_json::to_string(&Self::capture(context))
            .map_err(|e| DialogError::Store(format!("cannot encode context: {e}")))
    }

    /// Decode a blob, checking its schema tag before its contents
    pub fn decode(blob: &str) -> Result<Self, SnapshotError> {
        let value: Value =
            serde_json::from_str(blob).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        let schema = value
            .get("schema")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if schema != SCHEMA_VERSION {
            return Err(SnapshotError::VersionMismatch {
                stored: schema.to_string(),
            });
        }
        serde_json::from_value(value).map_err(|e| SnapshotError::Corrupt(e.to_string()))
    }
}

/// Record kept per session id by a session store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub state_name: String,
    pub context_blob: String,
    /// Last non-deferred event
    pub active_at: Option<DateTime<Utc>>,
    /// Channel the session talks through
    pub channel: String,
}

/// One conversation: current state plus context
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub channel: String,
    pub state_name: String,
    pub context: Context,
    pub active_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Fresh session at the root state
    pub fn new(
        id: impl Into<String>,
        channel: impl Into<String>,
        root: impl Into<String>,
        max_depth: usize,
    ) -> Self {
        let state_name = root.into();
        let mut context = Context::new(max_depth);
        context.set_state(&state_name);
        Self {
            id: id.into(),
            channel: channel.into(),
            state_name,
            context,
            active_at: None,
        }
    }

    /// Full record for the store
    pub fn to_stored(&self) -> DialogResult<StoredSession> {
        Ok(StoredSession {
            session_id: self.id.clone(),
            state_name: self.state_name.clone(),
            context_blob: SessionSnapshot::encode(&self.context)?,
            active_at: self.active_at,
            channel: self.channel.clone(),
        })
    }

    /// Rebuild from a stored record
    pub fn from_stored(stored: &StoredSession, max_depth: usize) -> Result<Self, SnapshotError> {
        let mut context = SessionSnapshot::decode(&stored.context_blob)?.into_context(max_depth);
        context.set_state(&stored.state_name);
        Ok(Self {
            id: stored.session_id.clone(),
            channel: stored.channel.clone(),
            state_name: stored.state_name.clone(),
            context,
            active_at: stored.active_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Session {
        let mut session = Session::new("web:42", "web", "default.root", 30);
        session.context.advance();
        session.context.add_state("default.ask_name");
        session.state_name = "default.ask_name".to_string();
        session.context.set_value("name", "Ada");
        session
            .context
            .set("place", json!({"value": "Prague", "confidence": 0.9}))
            .unwrap();
        session.active_at = Some(Utc::now());
        session
    }

    #[test]
    fn test_snapshot_restores_equal_context() {
        let session = sample();
        let stored = session.to_stored().unwrap();
        let restored = Session::from_stored(&stored, 30).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_snapshot_is_tagged() {
        let blob = SessionSnapshot::encode(&sample().context).unwrap();
        let value: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(value["schema"], json!(SCHEMA_VERSION));
    }

    #[test]
    fn test_other_schema_is_version_mismatch() {
        let err = SessionSnapshot::decode(r#"{"schema": "dialog/0", "counter": 3}"#).unwrap_err();
        assert_eq!(
            err,
            SnapshotError::VersionMismatch {
                stored: "dialog/0".into()
            }
        );

        let err = SessionSnapshot::decode(r#"{"counter": 3}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::VersionMismatch { .. }));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            SessionSnapshot::decode("{not json").unwrap_err(),
            SnapshotError::Corrupt(_)
        ));
        assert!(matches!(
            SessionSnapshot::decode(r#"{"schema": "dialog/1", "counter": "x"}"#).unwrap_err(),
            SnapshotError::Corrupt(_)
        ));
    }
}
