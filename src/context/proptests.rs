//! Property-based tests for the entity store
//!
//! Age, limit, depth and history bounds must hold for any sequence of writes.

use super::*;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// One step of a write script
#[derive(Debug, Clone)]
enum Step {
    /// Record a value for one of a few entity names
    Set { name: usize, value: i64 },
    /// Record several values in one batch
    Batch { name: usize, values: Vec<i64> },
    /// Next turn
    Advance,
    /// Visit a state
    Visit(u8),
}

const NAMES: [&str; 3] = ["color", "size", "intent"];

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..NAMES.len(), any::<i64>()).prop_map(|(name, value)| Step::Set { name, value }),
        (0..NAMES.len(), proptest::collection::vec(any::<i64>(), 1..4))
            .prop_map(|(name, values)| Step::Batch { name, values }),
        Just(Step::Advance),
        any::<u8>().prop_map(Step::Visit),
    ]
}

fn apply(ctx: &mut Context, steps: &[Step]) {
    for step in steps {
        match step {
            Step::Set { name, value } => ctx.set_value(NAMES[*name], *value),
            Step::Batch { name, values } => {
                let mut batch = EntityBatch::new();
                batch.insert(NAMES[*name].to_string(), json!(values));
                ctx.add_entities(&batch);
            }
            Step::Advance => {
                ctx.advance();
            }
            Step::Visit(n) => ctx.add_state(&format!("default.s{n}")),
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // get_all honors max_age and limit, newest first
    #[test]
    fn prop_get_all_respects_age_and_limit(
        steps in proptest::collection::vec(arb_step(), 0..60),
        max_age in proptest::option::of(0u64..6),
        limit in proptest::option::of(1usize..8),
    ) {
        let mut ctx = Context::default();
        apply(&mut ctx, &steps);

        for name in NAMES {
            let values = ctx.get_all(name, max_age, limit, &[]);
            if let Some(limit) = limit {
                prop_assert!(values.len() <= limit);
            }
            for v in &values {
                if let Some(max) = max_age {
                    prop_assert!(v.age(ctx.counter()) <= max, "value too old: {:?}", v);
                }
            }
            for pair in values.windows(2) {
                prop_assert!(pair[0].counter >= pair[1].counter, "not newest first");
            }
        }
    }

    // Entity logs never exceed max_depth and keep the most recent values
    #[test]
    fn prop_depth_bounded(
        depth in 1usize..10,
        values in proptest::collection::vec(any::<i64>(), 0..30),
    ) {
        let mut ctx = Context::new(depth);
        for v in &values {
            ctx.set_value("n", *v);
        }
        let kept: Vec<_> = ctx.get_all("n", None, None, &[]).iter().map(|v| v.value.clone()).collect();
        let expected: Vec<_> = values.iter().rev().take(depth).map(|v| json!(v)).collect();
        prop_assert_eq!(kept, expected);
    }

    // History never exceeds its limit and drops oldest first
    #[test]
    fn prop_history_bounded(visits in proptest::collection::vec(any::<u8>(), 0..60)) {
        let mut ctx = Context::default();
        for v in &visits {
            ctx.add_state(&format!("default.s{v}"));
        }
        prop_assert!(ctx.history().len() <= HISTORY_LIMIT);
        let tail: Vec<String> = visits
            .iter()
            .skip(visits.len().saturating_sub(HISTORY_LIMIT))
            .map(|v| format!("default.s{v}"))
            .collect();
        let names: Vec<String> = ctx.history().iter().map(|h| h.name.clone()).collect();
        prop_assert_eq!(names, tail);
    }

    // Counters in every log are non-increasing front to back
    #[test]
    fn prop_counters_monotonic(steps in proptest::collection::vec(arb_step(), 0..60)) {
        let mut ctx = Context::default();
        apply(&mut ctx, &steps);
        for log in ctx.entities().values() {
            for pair in log.windows(2) {
                prop_assert!(pair[0].counter >= pair[1].counter);
            }
            prop_assert!(log.iter().all(|v| v.counter <= ctx.counter()));
        }
    }

    // Turn filters partition a log: newer_than(n) and older_than(n) are complementary
    #[test]
    fn prop_turn_filters_partition(
        steps in proptest::collection::vec(arb_step(), 0..60),
        n in 0u64..6,
    ) {
        let mut ctx = Context::default();
        apply(&mut ctx, &steps);
        for name in NAMES {
            let total = ctx.query(name).count();
            let newer = ctx.query(name).newer_than(AgeFilter::messages(n)).unwrap().count();
            let older = ctx.query(name).older_than(AgeFilter::messages(n)).unwrap().count();
            prop_assert_eq!(newer + older, total);
        }
    }
}
