//! Chainable temporal filtering over one entity log

use super::{Context, EntityValue};
use crate::error::{DialogError, DialogResult};
use crate::pattern::StartPattern;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ptr;

/// Reference point for an age comparison.
///
/// Exactly one of the fields must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeFilter {
    /// Turn-count delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<u64>,
    /// Wall-clock delta in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    /// Absolute wall-clock time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
enum Threshold {
    Turns(u64),
    Time(DateTime<Utc>),
}

impl AgeFilter {
    pub fn messages(count: u64) -> Self {
        Self {
            messages: Some(count),
            ..Self::default()
        }
    }

    pub fn delta(delta: std::time::Duration) -> Self {
        Self {
            seconds: Some(delta.as_secs()),
            ..Self::default()
        }
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            at: Some(time),
            ..Self::default()
        }
    }

    /// Check that exactly one reference point is set
    pub fn validate(&self) -> DialogResult<()> {
        let set = [
            self.messages.is_some(),
            self.seconds.is_some(),
            self.at.is_some(),
        ]
        .iter()
        .filter(|s| **s)
        .count();
        match set {
            1 => Ok(()),
            0 => Err(DialogError::configuration(
                "age filter needs a message count, a time delta or an absolute time",
            )),
            _ => Err(DialogError::configuration(
                "use either a message count, a time delta or an absolute time, not several",
            )),
        }
    }

    fn threshold(&self) -> DialogResult<Threshold> {
        self.validate()?;
        if let Some(count) = self.messages {
            return Ok(Threshold::Turns(count));
        }
        if let Some(seconds) = self.seconds {
            let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
            let delta = Duration::try_seconds(seconds).unwrap_or(Duration::MAX);
            return Ok(Threshold::Time(Utc::now() - delta));
        }
        Ok(Threshold::Time(self.at.unwrap_or_else(Utc::now)))
    }
}

/// Read-only query over the values of one entity in one context
#[derive(Debug, Clone)]
pub struct EntityQuery<'a> {
    context: &'a Context,
    name: String,
    items: Vec<&'a EntityValue>,
}

impl<'a> EntityQuery<'a> {
    pub(super) fn new(context: &'a Context, name: &str) -> Self {
        Self {
            context,
            name: name.to_string(),
            items: context
                .entities
                .get(name)
                .map(|log| log.iter().collect())
                .unwrap_or_default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn age(&self, item: &EntityValue) -> u64 {
        item.age(self.context.counter)
    }

    /// Keep values observed at most `messages` turns ago, or after the given time
    pub fn newer_than(mut self, filter: AgeFilter) -> DialogResult<Self> {
        match filter.threshold()? {
            Threshold::Turns(n) => {
                let now = self.context.counter;
                self.items.retain(|x| x.age(now) <= n);
            }
            Threshold::Time(t) => self.items.retain(|x| x.timestamp > t),
        }
        Ok(self)
    }

    /// Keep values observed more than `messages` turns ago, or before the given time
    pub fn older_than(mut self, filter: AgeFilter) -> DialogResult<Self> {
        match filter.threshold()? {
            Threshold::Turns(n) => {
                let now = self.context.counter;
                self.items.retain(|x| x.age(now) > n);
            }
            Threshold::Time(t) => self.items.retain(|x| x.timestamp < t),
        }
        Ok(self)
    }

    /// Keep values observed exactly `messages` turns ago, or within a second of the given time
    pub fn exactly(mut self, filter: AgeFilter) -> DialogResult<Self> {
        match filter.threshold()? {
            Threshold::Turns(n) => {
                let now = self.context.counter;
                self.items.retain(|x| x.age(now) == n);
            }
            Threshold::Time(t) => self
                .items
                .retain(|x| (x.timestamp - t).num_milliseconds().abs() < 1000),
        }
        Ok(self)
    }

    /// Keep values recorded while a state matching `pattern` was active
    pub fn include_flow(mut self, pattern: &str) -> DialogResult<Self> {
        let pattern = StartPattern::new(pattern)?;
        self.items
            .retain(|x| pattern.matches(x.state_set.as_deref().unwrap_or_default()));
        Ok(self)
    }

    /// Drop values recorded while a state matching `pattern` was active
    pub fn exclude_flow(mut self, pattern: &str) -> DialogResult<Self> {
        let pattern = StartPattern::new(pattern)?;
        self.items
            .retain(|x| !pattern.matches(x.state_set.as_deref().unwrap_or_default()));
        Ok(self)
    }

    /// Keep values observed in the same turn as `entity == value`
    #[must_use]
    pub fn set_with(mut self, entity: &str, value: &Value) -> Self {
        let context = self.context;
        self.items
            .retain(|x| observed_together(context, entity, value, x.counter));
        self
    }

    /// Keep values not observed in the same turn as `entity == value`
    #[must_use]
    pub fn not_set_with(mut self, entity: &str, value: &Value) -> Self {
        let context = self.context;
        self.items
            .retain(|x| !observed_together(context, entity, value, x.counter));
        self
    }

    /// Most recent value by wall-clock time
    pub fn latest(&self) -> Option<&'a EntityValue> {
        self.items
            .iter()
            .copied()
            .reduce(|best, x| if x.timestamp > best.timestamp { x } else { best })
    }

    pub fn latest_v(&self) -> Option<&'a Value> {
        self.latest().map(|x| &x.value)
    }

    /// Most recent value, only if it was observed in the current turn
    pub fn current(&self) -> Option<&'a EntityValue> {
        self.latest()
            .filter(|x| x.counter == self.context.counter)
    }

    pub fn current_v(&self) -> Option<&'a Value> {
        self.current().map(|x| &x.value)
    }

    pub fn all(&self) -> Vec<&'a EntityValue> {
        self.items.clone()
    }

    pub fn all_v(&self) -> Vec<&'a Value> {
        self.items.iter().map(|x| &x.value).collect()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ages of the remaining values, newest first
    pub fn ages(&self) -> Vec<u64> {
        self.items.iter().map(|x| self.age(x)).collect()
    }

    /// Union of two queries over the same context, newest first
    pub fn or(self, other: EntityQuery<'a>) -> DialogResult<Self> {
        if !ptr::eq(self.context, other.context) {
            return Err(DialogError::configuration(format!(
                "refusing to combine \"{}\" and \"{}\": queries belong to different contexts",
                self.name, other.name
            )));
        }
        let mut items = self.items;
        for item in other.items {
            if !items.iter().any(|x| ptr::eq(*x, item)) {
                items.push(item);
            }
        }
        items.sort_by(|a, b| {
            b.counter
                .cmp(&a.counter)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        Ok(Self {
            context: self.context,
            name: format!("{}|{}", self.name, other.name),
            items,
        })
    }
}

fn observed_together(context: &Context, entity: &str, value: &Value, counter: u64) -> bool {
    context
        .entities
        .get(entity)
        .is_some_and(|log| log.iter().any(|e| e.counter == counter && &e.value == value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_at(counter: u64) -> Context {
        let mut ctx = Context::default();
        for _ in 0..counter {
            ctx.advance();
        }
        ctx
    }

    #[test]
    fn test_newer_than_messages_boundary() {
        // color observed at turn 5
        let mut ctx = context_at(5);
        ctx.set_value("color", "red");

        ctx.advance();
        let at_six = ctx
            .query("color")
            .newer_than(AgeFilter::messages(1))
            .unwrap()
            .all_v();
        assert_eq!(at_six, vec![&json!("red")]);

        ctx.advance();
        let at_seven = ctx
            .query("color")
            .newer_than(AgeFilter::messages(1))
            .unwrap()
            .all_v();
        assert!(at_seven.is_empty());
    }

    #[test]
    fn test_older_than_and_exactly() {
        let mut ctx = Context::default();
        ctx.set_value("x", "a");
        ctx.advance();
        ctx.set_value("x", "b");
        ctx.advance();
        ctx.set_value("x", "c");

        let older = ctx.query("x").older_than(AgeFilter::messages(0)).unwrap();
        assert_eq!(older.all_v(), vec![&json!("b"), &json!("a")]);

        let exact = ctx.query("x").exactly(AgeFilter::messages(1)).unwrap();
        assert_eq!(exact.all_v(), vec![&json!("b")]);
        assert_eq!(exact.ages(), vec![1]);
    }

    #[test]
    fn test_ambiguous_filter_is_configuration_error() {
        let ctx = Context::default();
        let filter = AgeFilter {
            messages: Some(1),
            seconds: Some(10),
            at: None,
        };
        let err = ctx.query("x").newer_than(filter).unwrap_err();
        assert!(matches!(err, DialogError::Configuration(_)));

        let err = ctx.query("x").older_than(AgeFilter::default()).unwrap_err();
        assert!(matches!(err, DialogError::Configuration(_)));
    }

    #[test]
    fn test_time_filters() {
        let mut ctx = Context::default();
        ctx.set_value("x", 1);

        let recent = ctx
            .query("x")
            .newer_than(AgeFilter::delta(std::time::Duration::from_secs(60)))
            .unwrap();
        assert_eq!(recent.count(), 1);

        let stale = ctx
            .query("x")
            .older_than(AgeFilter::delta(std::time::Duration::from_secs(60)))
            .unwrap();
        assert!(stale.is_empty());

        let future = ctx
            .query("x")
            .newer_than(AgeFilter::at(Utc::now() + Duration::seconds(60)))
            .unwrap();
        assert!(future.is_empty());

        let exact_now = ctx.query("x").exactly(AgeFilter::at(Utc::now())).unwrap();
        assert_eq!(exact_now.count(), 1);
    }

    #[test]
    fn test_flow_filters() {
        let mut ctx = Context::default();
        ctx.add_state("order.ask_size");
        ctx.set_value("answer", "large");
        ctx.add_state("help.root");
        ctx.set_value("answer", "what?");

        let order = ctx.query("answer").include_flow("order\\.").unwrap();
        assert_eq!(order.all_v(), vec![&json!("large")]);

        let not_help = ctx.query("answer").exclude_flow("help").unwrap();
        assert_eq!(not_help.all_v(), vec![&json!("large")]);

        assert!(ctx.query("answer").include_flow("(").is_err());
    }

    #[test]
    fn test_latest_and_current() {
        let mut ctx = Context::default();
        ctx.set_value("x", "old");
        ctx.advance();

        let q = ctx.query("x");
        assert_eq!(q.latest_v(), Some(&json!("old")));
        assert!(q.current().is_none());

        ctx.set_value("x", "new");
        let q = ctx.query("x");
        assert_eq!(q.current_v(), Some(&json!("new")));
    }

    #[test]
    fn test_set_with() {
        let mut ctx = Context::default();
        ctx.set_value("intent", "order");
        ctx.set_value("size", "large");
        ctx.advance();
        ctx.set_value("size", "small");

        let with_order = ctx.query("size").set_with("intent", &json!("order"));
        assert_eq!(with_order.all_v(), vec![&json!("large")]);

        let without = ctx.query("size").not_set_with("intent", &json!("order"));
        assert_eq!(without.all_v(), vec![&json!("small")]);
    }

    #[test]
    fn test_or_same_context() {
        let mut ctx = Context::default();
        ctx.set_value("a", 1);
        ctx.advance();
        ctx.set_value("b", 2);

        let both = ctx.query("a").or(ctx.query("b")).unwrap();
        assert_eq!(both.name(), "a|b");
        assert_eq!(both.all_v(), vec![&json!(2), &json!(1)]);
    }

    #[test]
    fn test_or_different_contexts_fails() {
        let mut one = Context::default();
        one.set_value("a", 1);
        let mut two = Context::default();
        two.set_value("a", 1);

        let err = one.query("a").or(two.query("a")).unwrap_err();
        assert!(matches!(err, DialogError::Configuration(_)));
    }
}
