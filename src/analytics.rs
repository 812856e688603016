//! Analytics sink writing structured tracing events
//!
//! Events go to the `dialog_engine::analytics` target so a subscriber can
//! route them apart from operational logs.

use crate::engine::{LogSink, Profile};
use crate::error::{DialogError, DialogResult};
use crate::state_machine::{EventKind, Response};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log_user(&self, session_id: &str, profile: &Profile) -> DialogResult<()> {
        tracing::info!(
            target: "dialog_engine::analytics",
            session_id = %session_id,
            user_id = %profile.id,
            display_name = profile.display_name.as_deref().unwrap_or_default(),
            "user"
        );
        Ok(())
    }

    fn log_user_message(
        &self,
        session_id: &str,
        kind: &EventKind,
        entities: &BTreeMap<String, Vec<Value>>,
        accepted_at: DateTime<Utc>,
        state: &str,
    ) -> DialogResult<()> {
        let entities = serde_json::to_string(entities)
            .map_err(|e| DialogError::invalid_value(e.to_string()))?;
        tracing::info!(
            target: "dialog_engine::analytics",
            session_id = %session_id,
            kind = %kind,
            state = %state,
            accepted_at = %accepted_at.to_rfc3339(),
            entities = %entities,
            "user_message"
        );
        Ok(())
    }

    fn log_bot_message(&self, session_id: &str, response: &Response, state: &str) -> DialogResult<()> {
        let response = serde_json::to_string(response)
            .map_err(|e| DialogError::invalid_value(e.to_string()))?;
        tracing::info!(
            target: "dialog_engine::analytics",
            session_id = %session_id,
            state = %state,
            response = %response,
            "bot_message"
        );
        Ok(())
    }

    fn log_error(&self, session_id: &str, error: &DialogError, state: &str) -> DialogResult<()> {
        tracing::warn!(
            target: "dialog_engine::analytics",
            session_id = %session_id,
            state = %state,
            error = %error,
            "error"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_accepts_every_record() {
        let sink = TracingLogSink;
        let mut entities = BTreeMap::new();
        entities.insert("intent".to_string(), vec![Value::from("greeting")]);

        assert!(sink.log_user("u1", &Profile::new("u1")).is_ok());
        assert!(sink
            .log_user_message("u1", &EventKind::Message, &entities, Utc::now(), "default.root")
            .is_ok());
        assert!(sink
            .log_bot_message("u1", &Response::text("Hi"), "default.root")
            .is_ok());
        assert!(sink
            .log_error("u1", &DialogError::UnknownIntent("x".into()), "default.root")
            .is_ok());
    }
}
