//! Inbound events that drive a dialog turn

use crate::context::EntityBatch;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Entity carrying the callback name of a deferred event
pub const CALLBACK_ENTITY: &str = "_callback_name";
/// Entity carrying the seconds since the session was last active
pub const INACTIVE_SECONDS_ENTITY: &str = "_inactive_seconds";
/// Intent of a timed callback
pub const SCHEDULE_INTENT: &str = "_schedule";
/// Intent of an inactivity callback
pub const INACTIVE_INTENT: &str = "_inactive";

/// Kind of inbound event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Message,
    Postback,
    /// Deferred callback, does not advance the turn counter
    Schedule,
    /// Anything else a channel delivers (read receipts, typing notifications)
    Unsupported(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Postback => "postback",
            Self::Schedule => "schedule",
            Self::Unsupported(kind) => kind,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Schedule)
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "message" => Self::Message,
            "postback" => Self::Postback,
            "schedule" => Self::Schedule,
            _ => Self::Unsupported(kind),
        }
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        Self::from(kind.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound event for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub entities: EntityBatch,
    /// Turn counter captured when a deferred event was scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_guard: Option<u64>,
}

impl Event {
    pub fn new(kind: impl Into<EventKind>, entities: EntityBatch) -> Self {
        Self {
            kind: kind.into(),
            entities,
            turn_guard: None,
        }
    }

    pub fn message(entities: EntityBatch) -> Self {
        Self::new(EventKind::Message, entities)
    }

    pub fn postback(entities: EntityBatch) -> Self {
        Self::new(EventKind::Postback, entities)
    }

    /// Timed callback requested by an action or a periodic job
    pub fn scheduled(callback: &str) -> Self {
        let mut entities = EntityBatch::new();
        entities.insert("intent".into(), json!(SCHEDULE_INTENT));
        entities.insert(CALLBACK_ENTITY.into(), json!(callback));
        Self::new(EventKind::Schedule, entities)
    }

    /// Inactivity callback guarded by the turn counter at schedule time
    pub fn inactivity(callback: &str, seconds: u64, turn_guard: u64) -> Self {
        let mut entities = EntityBatch::new();
        entities.insert("intent".into(), json!(INACTIVE_INTENT));
        entities.insert(INACTIVE_SECONDS_ENTITY.into(), json!(seconds));
        entities.insert(CALLBACK_ENTITY.into(), json!(callback));
        Self {
            kind: EventKind::Schedule,
            entities,
            turn_guard: Some(turn_guard),
        }
    }

    #[must_use]
    pub fn with_entity(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entities.insert(name.to_string(), value.into());
        self
    }

    /// Whether the event itself carries an entity (as opposed to one left over from the turn)
    pub fn carries(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_strings() {
        assert_eq!(EventKind::from("postback"), EventKind::Postback);
        assert_eq!(
            EventKind::from("seen"),
            EventKind::Unsupported("seen".into())
        );
        assert!(!EventKind::from("seen").is_supported());
        assert!(EventKind::Schedule.is_deferred());
    }

    #[test]
    fn test_deserialize_event() {
        let event: Event = serde_json::from_value(json!({
            "type": "message",
            "entities": {"intent": "greeting"}
        }))
        .unwrap();
        assert_eq!(event.kind, EventKind::Message);
        assert!(event.carries("intent"));
        assert_eq!(event.turn_guard, None);
    }

    #[test]
    fn test_inactivity_event_carries_guard_and_intent() {
        let event = Event::inactivity("nudge", 60, 10);
        assert_eq!(event.kind, EventKind::Schedule);
        assert_eq!(event.turn_guard, Some(10));
        assert_eq!(event.entities["intent"], json!(INACTIVE_INTENT));
        assert_eq!(event.entities[CALLBACK_ENTITY], json!("nudge"));
    }
}
