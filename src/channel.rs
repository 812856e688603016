//! Generic webhook channel
//!
//! Inbound payloads are `{"type": ..., "entities": {...}}`. Outbound
//! responses and state changes are fanned out per session over tokio
//! broadcast channels, which the HTTP layer streams as server-sent events.

use crate::engine::ChannelAdapter;
use crate::error::{DialogError, DialogResult};
use crate::state_machine::{Event, Response};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 128;

/// Something the bot did that a listener may want to see
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    Message { response: Response },
    StateChange { state: String },
    /// A turn started (`true`) or finished (`false`)
    Processing { active: bool },
}

pub struct WebhookChannel {
    name: String,
    listeners: Mutex<HashMap<String, broadcast::Sender<ChannelEvent>>>,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Listen to everything sent to a session from now on
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ChannelEvent> {
        self.listeners
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, session_id: &str, event: ChannelEvent) {
        let mut listeners = self.listeners.lock().unwrap();
        let Some(tx) = listeners.get(session_id) else {
            return;
        };
        if tx.send(event).is_err() {
            // last listener went away
            listeners.remove(session_id);
        }
    }
}

impl ChannelAdapter for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_message(&self, raw: &Value) -> DialogResult<Event> {
        serde_json::from_value(raw.clone())
            .map_err(|e| DialogError::Channel(format!("{} cannot parse payload: {e}", self.name)))
    }

    fn post_message(&self, session_id: &str, response: &Response) -> DialogResult<()> {
        tracing::debug!(channel = %self.name, session_id = %session_id, "Posting response");
        self.publish(
            session_id,
            ChannelEvent::Message {
                response: response.clone(),
            },
        );
        Ok(())
    }

    fn processing_start(&self, session_id: &str) {
        self.publish(session_id, ChannelEvent::Processing { active: true });
    }

    fn processing_end(&self, session_id: &str) {
        self.publish(session_id, ChannelEvent::Processing { active: false });
    }

    fn state_change(&self, session_id: &str, state: &str) {
        self.publish(
            session_id,
            ChannelEvent::StateChange {
                state: state.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::EventKind;
    use serde_json::json;

    #[test]
    fn test_parse_payload() {
        let channel = WebhookChannel::new("webhook");
        let event = channel
            .parse_message(&json!({"type": "postback", "entities": {"_state": "help.root"}}))
            .unwrap();
        assert_eq!(event.kind, EventKind::Postback);
        assert_eq!(event.entities["_state"], json!("help.root"));

        let event = channel.parse_message(&json!({"type": "read"})).unwrap();
        assert!(!event.kind.is_supported());

        assert!(matches!(
            channel.parse_message(&json!("hello")),
            Err(DialogError::Channel(_))
        ));
    }

    #[test]
    fn test_listeners_receive_session_events() {
        let channel = WebhookChannel::new("webhook");
        let mut rx = channel.subscribe("u1");
        let mut other = channel.subscribe("u2");

        channel.processing_start("u1");
        channel.post_message("u1", &Response::text("Hi")).unwrap();
        channel.state_change("u1", "default.ask_name");

        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::Processing { active: true });
        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::Message {
                response: Response::text("Hi")
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::StateChange {
                state: "default.ask_name".into()
            }
        );
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn test_posting_without_listeners_is_fine() {
        let channel = WebhookChannel::new("webhook");
        assert!(channel.post_message("u1", &Response::text("Hi")).is_ok());

        drop(channel.subscribe("u1"));
        assert!(channel.post_message("u1", &Response::text("Hi")).is_ok());
        assert!(channel.listeners.lock().unwrap().is_empty());
    }

    #[test]
    fn test_event_wire_shape() {
        let value = serde_json::to_value(ChannelEvent::StateChange {
            state: "help.root".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "state_change", "state": "help.root"}));
    }
}
