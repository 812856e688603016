//! Flow/state graph
//!
//! Flows are loaded from a [`FlowProvider`], resolved against an
//! [`ActionRegistry`] and frozen into a [`FlowGraph`] shared by all sessions.

mod definition;
mod graph;
mod provider;
mod registry;
mod templates;

pub use definition::{ActionRef, FlowDef, FlowSetDefinition, OrderedMap, RequirementDef, StateDef};
pub use graph::{Flow, FlowGraph, Requirement, State};
pub use provider::{FileFlowProvider, FlowProvider, StaticFlowProvider};
pub use registry::{Action, ActionError, ActionInput, ActionRegistry, Predicate};
