//! Trait abstractions for the engine's collaborators
//!
//! These traits enable testing the engine with recording implementations.
//! Every call is synchronous: a turn runs start to finish on one worker.

use crate::error::{DialogError, DialogResult};
use crate::session::StoredSession;
use crate::state_machine::{Event, EventKind, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Channel-qualified session address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    pub channel: String,
    pub session_id: String,
}

impl SessionRef {
    pub fn new(channel: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.session_id)
    }
}

/// What a channel knows about the user behind a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Messaging platform adapter
pub trait ChannelAdapter: Send + Sync {
    /// Name stored with every session of this channel
    fn name(&self) -> &str;

    /// Turn a raw platform payload into an event
    fn parse_message(&self, raw: &Value) -> DialogResult<Event>;

    /// Deliver one response to the user
    fn post_message(&self, session_id: &str, response: &Response) -> DialogResult<()>;

    fn processing_start(&self, _session_id: &str) {}

    fn processing_end(&self, _session_id: &str) {}

    /// Called after every move to a different state
    fn state_change(&self, _session_id: &str, _state: &str) {}

    fn load_profile(&self, session_id: &str) -> Profile {
        Profile::new(session_id)
    }
}

/// Key-value session persistence with one process-wide schema marker.
///
/// Records are keyed by channel and session id together; the same raw id
/// on two channels is two sessions. Writes are always full overwrites of a
/// session record.
pub trait SessionStore: Send + Sync {
    fn load(&self, session: &SessionRef) -> DialogResult<Option<StoredSession>>;

    /// Stored under `(session.channel, session.session_id)`
    fn save(&self, session: &StoredSession) -> DialogResult<()>;

    fn clear(&self, session: &SessionRef) -> DialogResult<()>;

    fn schema_version(&self) -> DialogResult<Option<String>>;

    fn set_schema_version(&self, version: &str) -> DialogResult<()>;

    /// Every stored session with its channel
    fn list_sessions(&self) -> DialogResult<Vec<SessionRef>>;
}

/// Deferred event delivery
pub trait Scheduler: Send + Sync {
    fn schedule_at(&self, session: &SessionRef, callback: &str, at: DateTime<Utc>)
        -> DialogResult<()>;

    fn schedule_after(&self, session: &SessionRef, callback: &str, delay: Duration)
        -> DialogResult<()>;

    /// Inactivity callback, stale once the session's counter moved past `turn_guard`
    fn schedule_inactivity(
        &self,
        session: &SessionRef,
        callback: &str,
        delay: Duration,
        turn_guard: u64,
    ) -> DialogResult<()>;
}

/// Fire-and-forget analytics; failures are logged and never abort a turn
pub trait LogSink: Send + Sync {
    fn log_user(&self, session_id: &str, profile: &Profile) -> DialogResult<()>;

    fn log_user_message(
        &self,
        session_id: &str,
        kind: &EventKind,
        entities: &BTreeMap<String, Vec<Value>>,
        accepted_at: DateTime<Utc>,
        state: &str,
    ) -> DialogResult<()>;

    fn log_bot_message(&self, session_id: &str, response: &Response, state: &str)
        -> DialogResult<()>;

    fn log_error(&self, session_id: &str, error: &DialogError, state: &str) -> DialogResult<()>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

impl<T: ChannelAdapter + ?Sized> ChannelAdapter for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn parse_message(&self, raw: &Value) -> DialogResult<Event> {
        (**self).parse_message(raw)
    }

    fn post_message(&self, session_id: &str, response: &Response) -> DialogResult<()> {
        (**self).post_message(session_id, response)
    }

    fn processing_start(&self, session_id: &str) {
        (**self).processing_start(session_id);
    }

    fn processing_end(&self, session_id: &str) {
        (**self).processing_end(session_id);
    }

    fn state_change(&self, session_id: &str, state: &str) {
        (**self).state_change(session_id, state);
    }

    fn load_profile(&self, session_id: &str) -> Profile {
        (**self).load_profile(session_id)
    }
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn load(&self, session: &SessionRef) -> DialogResult<Option<StoredSession>> {
        (**self).load(session)
    }

    fn save(&self, session: &StoredSession) -> DialogResult<()> {
        (**self).save(session)
    }

    fn clear(&self, session: &SessionRef) -> DialogResult<()> {
        (**self).clear(session)
    }

    fn schema_version(&self) -> DialogResult<Option<String>> {
        (**self).schema_version()
    }

    fn set_schema_version(&self, version: &str) -> DialogResult<()> {
        (**self).set_schema_version(version)
    }

    fn list_sessions(&self) -> DialogResult<Vec<SessionRef>> {
        (**self).list_sessions()
    }
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn schedule_at(
        &self,
        session: &SessionRef,
        callback: &str,
        at: DateTime<Utc>,
    ) -> DialogResult<()> {
        (**self).schedule_at(session, callback, at)
    }

    fn schedule_after(
        &self,
        session: &SessionRef,
        callback: &str,
        delay: Duration,
    ) -> DialogResult<()> {
        (**self).schedule_after(session, callback, delay)
    }

    fn schedule_inactivity(
        &self,
        session: &SessionRef,
        callback: &str,
        delay: Duration,
        turn_guard: u64,
    ) -> DialogResult<()> {
        (**self).schedule_inactivity(session, callback, delay, turn_guard)
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn log_user(&self, session_id: &str, profile: &Profile) -> DialogResult<()> {
        (**self).log_user(session_id, profile)
    }

    fn log_user_message(
        &self,
        session_id: &str,
        kind: &EventKind,
        entities: &BTreeMap<String, Vec<Value>>,
        accepted_at: DateTime<Utc>,
        state: &str,
    ) -> DialogResult<()> {
        (**self).log_user_message(session_id, kind, entities, accepted_at, state)
    }

    fn log_bot_message(
        &self,
        session_id: &str,
        response: &Response,
        state: &str,
    ) -> DialogResult<()> {
        (**self).log_bot_message(session_id, response, state)
    }

    fn log_error(&self, session_id: &str, error: &DialogError, state: &str) -> DialogResult<()> {
        (**self).log_error(session_id, error, state)
    }
}

/// Scheduler that drops every request, for engines without deferred work
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn schedule_at(&self, session: &SessionRef, callback: &str, at: DateTime<Utc>) -> DialogResult<()> {
        tracing::debug!(session = %session, callback, at = %at, "No scheduler configured, dropping callback");
        Ok(())
    }

    fn schedule_after(&self, session: &SessionRef, callback: &str, delay: Duration) -> DialogResult<()> {
        tracing::debug!(session = %session, callback, ?delay, "No scheduler configured, dropping callback");
        Ok(())
    }

    fn schedule_inactivity(
        &self,
        session: &SessionRef,
        callback: &str,
        delay: Duration,
        _turn_guard: u64,
    ) -> DialogResult<()> {
        tracing::debug!(session = %session, callback, ?delay, "No scheduler configured, dropping inactivity callback");
        Ok(())
    }
}
