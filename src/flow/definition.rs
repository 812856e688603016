//! Declarative flow definitions as loaded from a provider

use crate::context::AgeFilter;
use crate::state_machine::TransitionTarget;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// String-keyed map that keeps definition order and duplicate keys
///
/// Duplicates are kept so graph construction can reject them instead of
/// silently keeping the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.0.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((k, v)) = access.next_entry::<String, V>()? {
            entries.push((k, v));
        }
        Ok(OrderedMap(entries))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Reference to the code a lifecycle hook runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionRef {
    /// Id of an action in the registry
    Registered(String),
    /// Built-in template instantiated with parameters
    Template {
        template: String,
        #[serde(default)]
        params: Value,
    },
}

impl ActionRef {
    pub fn registered(id: impl Into<String>) -> Self {
        Self::Registered(id.into())
    }

    pub fn template(template: impl Into<String>, params: Value) -> Self {
        Self::Template {
            template: template.into(),
            params,
        }
    }
}

/// One requirement gating a state's accept action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementDef {
    /// Entity that must be present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Registered predicate that must hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    /// Optional age filter applied to the entity
    #[serde(flatten)]
    pub filter: AgeFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_flow: Option<String>,
    /// Remedial action run when the requirement is unmet
    pub action: ActionRef,
}

impl RequirementDef {
    pub fn entity(name: impl Into<String>, action: ActionRef) -> Self {
        Self {
            entity: Some(name.into()),
            predicate: None,
            filter: AgeFilter::default(),
            include_flow: None,
            exclude_flow: None,
            action,
        }
    }

    pub fn predicate(id: impl Into<String>, action: ActionRef) -> Self {
        Self {
            entity: None,
            predicate: Some(id.into()),
            filter: AgeFilter::default(),
            include_flow: None,
            exclude_flow: None,
            action,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: AgeFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<ActionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<ActionRef>,
    /// Pattern of intents this state accepts from anywhere in its flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Per-state intent overrides, first match wins
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub intent_transitions: OrderedMap<TransitionTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<RequirementDef>,
}

impl StateDef {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn init(mut self, action: ActionRef) -> Self {
        self.init = Some(action);
        self
    }

    #[must_use]
    pub fn accept(mut self, action: ActionRef) -> Self {
        self.accept = Some(action);
        self
    }

    #[must_use]
    pub fn intent(mut self, pattern: impl Into<String>) -> Self {
        self.intent = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn on_intent(mut self, pattern: impl Into<String>, target: TransitionTarget) -> Self {
        self.intent_transitions.insert(pattern, target);
        self
    }

    #[must_use]
    pub fn requires(mut self, requirement: RequirementDef) -> Self {
        self.requires.push(requirement);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
    /// Intent pattern of the flow, defaults to the flow name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub states: OrderedMap<StateDef>,
}

impl FlowDef {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn intent(mut self, pattern: impl Into<String>) -> Self {
        self.intent = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn state(mut self, name: impl Into<String>, state: StateDef) -> Self {
        self.states.insert(name, state);
        self
    }
}

/// Every flow of a bot, keyed by flow name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowSetDefinition {
    pub flows: OrderedMap<FlowDef>,
}

impl FlowSetDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn flow(mut self, name: impl Into<String>, flow: FlowDef) -> Self {
        self.flows.insert(name, flow);
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_is_preserved() {
        let def = FlowSetDefinition::from_json(
            r#"{
                "zeta": {"states": {"root": {}, "b": {}, "a": {}}},
                "alpha": {"states": {"root": {}}}
            }"#,
        )
        .unwrap();
        let flows: Vec<_> = def.flows.keys().collect();
        assert_eq!(flows, vec!["zeta", "alpha"]);
        let states: Vec<_> = def.flows.get("zeta").unwrap().states.keys().collect();
        assert_eq!(states, vec!["root", "b", "a"]);
    }

    #[test]
    fn test_duplicate_keys_are_kept() {
        let def = FlowSetDefinition::from_json(
            r#"{"default": {"states": {"root": {}, "root": {}}}}"#,
        )
        .unwrap();
        assert_eq!(def.flows.get("default").unwrap().states.len(), 2);
    }

    #[test]
    fn test_action_refs() {
        let state: StateDef = serde_json::from_value(json!({
            "init": "greet",
            "accept": {"template": "message", "params": {"text": "Hi"}},
            "intent_transitions": {"bye": "goodbye.root", "back": -1}
        }))
        .unwrap();
        assert_eq!(state.init, Some(ActionRef::registered("greet")));
        assert_eq!(
            state.accept,
            Some(ActionRef::template("message", json!({"text": "Hi"})))
        );
        assert_eq!(
            state.intent_transitions.get("back"),
            Some(&TransitionTarget::History(-1))
        );
    }

    #[test]
    fn test_requirement_with_filter() {
        let req: RequirementDef = serde_json::from_value(json!({
            "entity": "size",
            "messages": 2,
            "action": {"template": "message", "params": {"text": "Which size?"}}
        }))
        .unwrap();
        assert_eq!(req.entity.as_deref(), Some("size"));
        assert_eq!(req.filter, AgeFilter::messages(2));
    }
}
