//! Built-in action templates usable straight from a flow definition
//!
//! - `message`: send one or more texts, optionally move on
//! - `input`: wait until an entity was provided, nag otherwise
//! - `value_transition`: branch on the value of an entity

use super::definition::OrderedMap;
use super::registry::{Action, ActionError, ActionInput};
use crate::error::{DialogError, DialogResult};
use crate::state_machine::{ActionOutcome, TransitionTarget};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// One text or a list of texts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Texts {
    One(String),
    Many(Vec<String>),
}

impl Texts {
    fn into_outcome(self) -> ActionOutcome {
        match self {
            Self::One(text) => ActionOutcome::reply(text),
            Self::Many(texts) => texts
                .into_iter()
                .fold(ActionOutcome::new(), |outcome, text| outcome.say(text)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    text: Texts,
    #[serde(default)]
    next: Option<TransitionTarget>,
}

#[derive(Debug, Deserialize)]
struct InputParams {
    entity: String,
    #[serde(default)]
    missing_message: Option<Texts>,
    #[serde(default)]
    max_age: u64,
    #[serde(default)]
    next: Option<TransitionTarget>,
}

#[derive(Debug, Deserialize)]
struct ValueTransitionParams {
    entity: String,
    transitions: OrderedMap<TransitionTarget>,
    #[serde(default)]
    missing_transition: Option<TransitionTarget>,
    #[serde(default)]
    next: Option<TransitionTarget>,
}

fn params<T: DeserializeOwned>(template: &str, params: &Value) -> DialogResult<T> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| {
        DialogError::configuration(format!("invalid params for template \"{template}\": {e}"))
    })
}

/// Instantiate a built-in template
pub fn instantiate(template: &str, raw: &Value) -> DialogResult<Arc<dyn Action>> {
    match template {
        "message" => {
            let p: MessageParams = params(template, raw)?;
            Ok(Arc::new(move |_: &mut ActionInput<'_>| {
                let mut outcome = p.text.clone().into_outcome();
                outcome.next.clone_from(&p.next);
                Ok::<_, ActionError>(outcome)
            }))
        }
        "input" => {
            let p: InputParams = params(template, raw)?;
            Ok(Arc::new(move |input: &mut ActionInput<'_>| {
                if input.context.get(&p.entity, Some(p.max_age)).is_none() {
                    let outcome = p
                        .missing_message
                        .clone()
                        .map_or_else(ActionOutcome::new, Texts::into_outcome);
                    return Ok::<_, ActionError>(outcome);
                }
                Ok(ActionOutcome {
                    next: p.next.clone(),
                    ..ActionOutcome::default()
                })
            }))
        }
        "value_transition" => {
            let p: ValueTransitionParams = params(template, raw)?;
            Ok(Arc::new(move |input: &mut ActionInput<'_>| {
                let next = match input.context.value(&p.entity, None) {
                    None => p.missing_transition.clone(),
                    Some(value) => p
                        .transitions
                        .iter()
                        .find(|(key, _)| value_matches(key, value))
                        .map(|(_, target)| target.clone())
                        .or_else(|| p.next.clone()),
                };
                Ok::<_, ActionError>(ActionOutcome {
                    next,
                    ..ActionOutcome::default()
                })
            }))
        }
        other => Err(DialogError::configuration(format!(
            "template \"{other}\" does not exist (expected message, input or value_transition)"
        ))),
    }
}

fn value_matches(key: &str, value: &Value) -> bool {
    match value {
        Value::String(s) => s == key,
        other => other.to_string() == key,
    }
}
