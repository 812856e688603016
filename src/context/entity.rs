//! Observed entity values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Incoming entities keyed by name; each value is a scalar, an object or a list of either
pub type EntityBatch = Map<String, Value>;

/// One observation of an entity, immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValue {
    pub name: String,
    pub value: Value,
    /// Full structured payload the value came from (extractor metadata etc.)
    #[serde(default)]
    pub raw: Value,
    /// Turn counter at insertion
    pub counter: u64,
    pub timestamp: DateTime<Utc>,
    /// State that was active when the value was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_set: Option<String>,
}

impl EntityValue {
    pub fn new(
        name: impl Into<String>,
        raw: Value,
        counter: u64,
        timestamp: DateTime<Utc>,
        state_set: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value_of(&raw),
            raw,
            counter,
            timestamp,
            state_set,
        }
    }

    /// Turns elapsed since the value was observed; 0 means this turn
    pub fn age(&self, counter_now: u64) -> u64 {
        counter_now.saturating_sub(self.counter)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Normalize one raw batch entry into a list of structured values.
///
/// A bare scalar becomes `{"value": scalar}`, an object is kept as is and a
/// list is normalized element by element.
pub fn normalize(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.iter().map(normalize_one).collect(),
        other => vec![normalize_one(other)],
    }
}

fn normalize_one(raw: &Value) -> Value {
    match raw {
        Value::Object(_) => raw.clone(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            Value::Object(map)
        }
    }
}

/// The entity value carried by a structured payload
fn value_of(raw: &Value) -> Value {
    match raw {
        Value::Object(map) => map.get("value").cloned().unwrap_or_else(|| raw.clone()),
        other => other.clone(),
    }
}
