//! Explicit registry of state actions and requirement predicates
//!
//! Flow definitions refer to code by id. Every id is resolved when the graph
//! is built, so a typo fails at load time rather than on first use.

use super::definition::ActionRef;
use super::graph::State;
use super::templates;
use crate::context::Context;
use crate::error::{DialogError, DialogResult};
use crate::state_machine::ActionOutcome;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by an action; becomes `DialogError::ActionExecution`
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ActionError(String);

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<DialogError> for ActionError {
    fn from(e: DialogError) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

/// Everything an action may look at or change
pub struct ActionInput<'a> {
    pub session_id: &'a str,
    /// State the action belongs to
    pub state: &'a State,
    pub context: &'a mut Context,
}

/// Code run by a lifecycle hook or a requirement's remedial action.
///
/// Actions are stateless between invocations; everything they need comes
/// through [`ActionInput`].
pub trait Action: Send + Sync {
    fn run(&self, input: &mut ActionInput<'_>) -> Result<ActionOutcome, ActionError>;
}

impl<F> Action for F
where
    F: Fn(&mut ActionInput<'_>) -> Result<ActionOutcome, ActionError> + Send + Sync,
{
    fn run(&self, input: &mut ActionInput<'_>) -> Result<ActionOutcome, ActionError> {
        self(input)
    }
}

/// Condition checked by a predicate requirement
pub trait Predicate: Send + Sync {
    fn check(&self, context: &Context) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Context) -> bool + Send + Sync,
{
    fn check(&self, context: &Context) -> bool {
        self(context)
    }
}

/// Action and predicate lookup by id
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
    predicates: HashMap<String, Arc<dyn Predicate>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; a later registration under the same id replaces it
    pub fn register(&mut self, id: impl Into<String>, action: impl Action + 'static) -> &mut Self {
        let id = id.into();
        if self.actions.insert(id.clone(), Arc::new(action)).is_some() {
            tracing::warn!(action = %id, "Replacing registered action");
        }
        self
    }

    /// Register a closure as an action
    pub fn register_fn<F>(&mut self, id: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&mut ActionInput<'_>) -> Result<ActionOutcome, ActionError> + Send + Sync + 'static,
    {
        self.register(id, f)
    }

    pub fn register_predicate(
        &mut self,
        id: impl Into<String>,
        predicate: impl Predicate + 'static,
    ) -> &mut Self {
        self.predicates.insert(id.into(), Arc::new(predicate));
        self
    }

    /// Register a closure as a predicate
    pub fn register_predicate_fn<F>(&mut self, id: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.register_predicate(id, f)
    }

    pub fn action(&self, id: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(id).cloned()
    }

    pub fn predicate(&self, id: &str) -> Option<Arc<dyn Predicate>> {
        self.predicates.get(id).cloned()
    }

    /// Registered action ids, sorted
    pub fn action_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Resolve a definition reference into runnable code
    pub fn resolve(&self, action: &ActionRef) -> DialogResult<Arc<dyn Action>> {
        match action {
            ActionRef::Registered(id) => self.action(id).ok_or_else(|| {
                DialogError::configuration(format!("action \"{id}\" is not registered"))
            }),
            ActionRef::Template { template, params } => templates::instantiate(template, params),
        }
    }

    pub fn resolve_predicate(&self, id: &str) -> DialogResult<Arc<dyn Predicate>> {
        self.predicate(id).ok_or_else(|| {
            DialogError::configuration(format!("predicate \"{id}\" is not registered"))
        })
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut predicates: Vec<&String> = self.predicates.keys().collect();
        predicates.sort_unstable();
        f.debug_struct("ActionRegistry")
            .field("actions", &self.action_ids())
            .field("predicates", &predicates)
            .finish()
    }
}
