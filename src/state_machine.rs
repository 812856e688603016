//! Dialog state machine
//!
//! Events, action outcomes and the pure resolution pipeline deciding which
//! state a turn moves to. The engine applies the plans.

mod effect;
pub mod event;
mod target;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{
    ActionOutcome, Button, ButtonAction, QuickReply, Response, ScheduleRequest, ScheduleWhen,
};
pub use event::{Event, EventKind};
pub use target::{qualify, LifecycleAction, TransitionTarget};
pub use transition::{plan_move, resolve_intent, MovePlan, INTENT_ENTITY, STATE_ENTITY};
