//! Property-based tests for the resolution pipeline
//!
//! These tests verify move planning invariants across arbitrary graphs
//! positions and targets.

use super::transition::*;
use super::*;
use crate::context::Context;
use crate::flow::{ActionRegistry, FlowDef, FlowGraph, FlowSetDefinition, StateDef};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

const FLOWS: [&str; 3] = ["default", "help", "order"];
const STATES: [&str; 3] = ["root", "ask", "done"];

fn test_graph() -> FlowGraph {
    let def = FLOWS.iter().fold(FlowSetDefinition::new(), |def, flow| {
        let flow_def = STATES
            .iter()
            .fold(FlowDef::new(), |f, s| f.state(*s, StateDef::new()));
        def.flow(*flow, flow_def)
    });
    FlowGraph::build(&def, &ActionRegistry::new(), "default.root").unwrap()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_qualified() -> impl Strategy<Value = String> {
    (0..FLOWS.len(), 0..STATES.len()).prop_map(|(f, s)| format!("{}.{}", FLOWS[f], STATES[s]))
}

fn arb_action() -> impl Strategy<Value = LifecycleAction> {
    prop_oneof![
        Just(LifecycleAction::Init),
        Just(LifecycleAction::Accept),
        Just(LifecycleAction::None),
    ]
}

fn arb_target() -> impl Strategy<Value = TransitionTarget> {
    prop_oneof![
        (arb_qualified(), arb_action())
            .prop_map(|(name, action)| TransitionTarget::Named { name, action }),
        (0..STATES.len(), arb_action()).prop_map(|(s, action)| TransitionTarget::Named {
            name: STATES[s].to_string(),
            action
        }),
        ("[a-z]{1,6}", arb_action())
            .prop_map(|(name, action)| TransitionTarget::Named { name, action }),
        (-25i64..25).prop_map(TransitionTarget::History),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: a planned move only ever lands on a state of the graph
    #[test]
    fn prop_enter_targets_exist(
        current in arb_qualified(),
        target in arb_target(),
        visited in proptest::collection::vec(arb_qualified(), 0..25),
        force in any::<bool>(),
    ) {
        let graph = test_graph();
        let mut ctx = Context::default();
        for v in &visited {
            ctx.add_state(v);
        }
        match plan_move(&graph, &current, &ctx, Some(&target), force) {
            MovePlan::Enter { state, .. } => {
                prop_assert!(graph.get_state(&state).is_some());
                prop_assert_ne!(state, current);
            }
            MovePlan::Stay { state, log } => {
                prop_assert_eq!(state, current);
                prop_assert_eq!(log, force);
            }
            MovePlan::Unknown { target } => prop_assert!(graph.get_state(&target).is_none()),
        }
    }

    // Invariant 2: moving to the current state never enters it
    #[test]
    fn prop_identical_move_never_enters(current in arb_qualified(), action in arb_action()) {
        let graph = test_graph();
        let target = TransitionTarget::Named { name: current.clone(), action };
        let plan = plan_move(&graph, &current, &Context::default(), Some(&target), false);
        prop_assert_eq!(plan, MovePlan::Stay { state: current, log: false });
    }

    // Invariant 3: history targets never run a lifecycle hook
    #[test]
    fn prop_history_targets_run_no_hook(
        current in arb_qualified(),
        offset in -25i64..25,
        visited in proptest::collection::vec(arb_qualified(), 0..25),
    ) {
        let graph = test_graph();
        let mut ctx = Context::default();
        for v in &visited {
            ctx.add_state(v);
        }
        let plan = plan_move(&graph, &current, &ctx, Some(&TransitionTarget::History(offset)), false);
        if let MovePlan::Enter { action, .. } = plan {
            prop_assert_eq!(action, LifecycleAction::None);
        }
    }

    // Invariant 4: qualified targets print back to what they parse from
    #[test]
    fn prop_target_display_parses_back(target in arb_target()) {
        let printed = target.to_string();
        let parsed = match &target {
            TransitionTarget::History(_) => TransitionTarget::from_value(&serde_json::to_value(&target).unwrap()),
            TransitionTarget::Named { .. } => printed.parse(),
        };
        prop_assert_eq!(parsed.unwrap(), target);
    }

    // Invariant 5: resolved intents always run accept
    #[test]
    fn prop_resolved_intents_accept(current in arb_qualified(), intent in "[a-z_]{1,12}") {
        let graph = test_graph();
        if let Some(TransitionTarget::Named { action, .. }) = resolve_intent(&graph, &current, &intent) {
            prop_assert_eq!(action, LifecycleAction::Accept);
        }
    }
}
