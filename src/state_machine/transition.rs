//! Pure transition resolution
//!
//! Deciding where a turn goes and whether a move happens does no I/O; the
//! engine applies the resulting plans and runs the actions.

use super::event::Event;
use super::target::{qualify, LifecycleAction, TransitionTarget};
use crate::context::Context;
use crate::error::DialogResult;
use crate::flow::FlowGraph;
use serde_json::Value;

/// Entity forcing navigation (postback payloads)
pub const STATE_ENTITY: &str = "_state";
/// Entity carrying the recognized intent
pub const INTENT_ENTITY: &str = "intent";

/// Result of planning a move to a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovePlan {
    /// Target is the current state; nothing runs, history is only touched when `log` is set
    Stay { state: String, log: bool },
    /// Target is absent from the graph
    Unknown { target: String },
    /// Enter another state, then run a lifecycle hook
    Enter {
        state: String,
        action: LifecycleAction,
    },
}

impl MovePlan {
    pub fn moved(&self) -> bool {
        matches!(self, Self::Enter { .. })
    }
}

/// Decide what moving from `current` to `target` means.
///
/// `None` stands for "stay". History targets re-enter the recorded state
/// without running a hook; a missing history entry also means "stay".
pub fn plan_move(
    graph: &FlowGraph,
    current: &str,
    context: &Context,
    target: Option<&TransitionTarget>,
    force_log: bool,
) -> MovePlan {
    let (name, action) = match target {
        None => (current.to_string(), LifecycleAction::Init),
        Some(TransitionTarget::History(n)) => {
            let name = context
                .history_state(n.saturating_sub(1))
                .map_or_else(|| current.to_string(), |h| h.name.clone());
            (name, LifecycleAction::None)
        }
        Some(TransitionTarget::Named { name, action }) => (qualify(name, current), *action),
    };

    if graph.get_state(&name).is_none() {
        return MovePlan::Unknown { target: name };
    }
    if name == current {
        return MovePlan::Stay {
            state: name,
            log: force_log,
        };
    }
    MovePlan::Enter {
        state: name,
        action,
    }
}

/// Value of a routing entity observed this turn.
///
/// Deferred events share the counter of the turn before them, so for those
/// only entities the event itself carried count.
pub fn turn_signal<'c>(context: &'c Context, event: &Event, name: &str) -> Option<&'c Value> {
    if event.kind.is_deferred() && !event.carries(name) {
        return None;
    }
    context.value(name, Some(0))
}

/// Explicit `_state` override of this turn
pub fn override_target(context: &Context, event: &Event) -> Option<DialogResult<TransitionTarget>> {
    turn_signal(context, event, STATE_ENTITY).map(TransitionTarget::from_value)
}

/// Intent of this turn as a string
pub fn turn_intent(context: &Context, event: &Event) -> Option<String> {
    turn_signal(context, event, INTENT_ENTITY).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Resolve an intent against the graph.
///
/// Order: the current state's own overrides, then state-level intent
/// patterns of the current flow, then flow-level patterns targeting the
/// flow's root. The resolved state runs its accept hook.
pub fn resolve_intent(graph: &FlowGraph, current: &str, intent: &str) -> Option<TransitionTarget> {
    if let Some(target) = graph
        .get_state(current)
        .and_then(|state| state.resolve_intent(intent))
    {
        return Some(target.clone().with_action(LifecycleAction::Accept));
    }

    let flow_name = current.split('.').next().unwrap_or(current);
    if let Some(state) = graph.get_flow(flow_name).and_then(|flow| {
        flow.states()
            .find(|s| s.intent().is_some_and(|p| p.matches(intent)))
    }) {
        return Some(TransitionTarget::accept(state.name()));
    }

    graph
        .flows()
        .find(|flow| flow.intent().matches(intent))
        .map(|flow| TransitionTarget::accept(flow.root_name()))
}
