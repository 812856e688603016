//! Per-session temporal entity store
//!
//! Every session owns one `Context`: a turn counter, a bounded newest-first
//! log per entity name and a bounded history of visited states.

mod entity;
mod query;

#[cfg(test)]
mod proptests;

pub use entity::{normalize, EntityBatch, EntityValue};
pub use query::{AgeFilter, EntityQuery};

use crate::error::{DialogError, DialogResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Number of state transitions kept in the history
pub const HISTORY_LIMIT: usize = 20;

/// Default number of values kept per entity
pub const DEFAULT_MAX_DEPTH: usize = 30;

/// A visited state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// Entity store and state history of one session
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    counter: u64,
    entities: BTreeMap<String, Vec<EntityValue>>,
    history: Vec<HistoryEntry>,
    max_depth: usize,
    /// Active state, recorded as the provenance of new values
    state: Option<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Context {
    pub fn new(max_depth: usize) -> Self {
        Self {
            counter: 0,
            entities: BTreeMap::new(),
            history: Vec::new(),
            max_depth: max_depth.max(1),
            state: None,
        }
    }

    /// Rebuild a context from persisted parts, re-applying the bounds
    pub fn from_parts(
        counter: u64,
        mut entities: BTreeMap<String, Vec<EntityValue>>,
        mut history: Vec<HistoryEntry>,
        max_depth: usize,
    ) -> Self {
        let max_depth = max_depth.max(1);
        for values in entities.values_mut() {
            values.truncate(max_depth);
        }
        if history.len() > HISTORY_LIMIT {
            history.drain(..history.len() - HISTORY_LIMIT);
        }
        let state = history.last().map(|h| h.name.clone());
        Self {
            counter,
            entities,
            history,
            max_depth,
            state,
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Advance the turn clock by one
    pub fn advance(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn entities(&self) -> &BTreeMap<String, Vec<EntityValue>> {
        &self.entities
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// State new values are tagged with
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    // ==================== Writes ====================

    /// Record a batch of observations at the current turn.
    ///
    /// Returns the normalized batch for logging.
    pub fn add_entities(&mut self, batch: &EntityBatch) -> BTreeMap<String, Vec<Value>> {
        let now = Utc::now();
        let provenance = self.state.clone();
        let mut normalized = BTreeMap::new();

        for (name, raw) in batch {
            let values = normalize(raw);
            for value in &values {
                self.push(EntityValue::new(
                    name.clone(),
                    value.clone(),
                    self.counter,
                    now,
                    provenance.clone(),
                ));
            }
            normalized.insert(name.clone(), values);
        }

        if !normalized.is_empty() {
            tracing::debug!(counter = self.counter, summary = %self.summary(5), "Context updated");
        }
        normalized
    }

    /// Record one structured value; it must be a JSON object
    pub fn set(&mut self, name: &str, raw: Value) -> DialogResult<()> {
        if !raw.is_object() {
            return Err(DialogError::invalid_value(format!(
                "use an object to set a context value, e.g. {{\"value\": \"foo\"}} (got {raw} for {name})"
            )));
        }
        let provenance = self.state.clone();
        self.push(EntityValue::new(name, raw, self.counter, Utc::now(), provenance));
        Ok(())
    }

    /// Record a single plain value
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) {
        let mut batch = EntityBatch::new();
        batch.insert(name.to_string(), value.into());
        self.add_entities(&batch);
    }

    /// Forget every observation of the given entities
    pub fn clear(&mut self, names: &[&str]) {
        for name in names {
            self.entities.remove(*name);
        }
    }

    fn push(&mut self, value: EntityValue) {
        let log = self.entities.entry(value.name.clone()).or_default();
        log.insert(0, value);
        log.truncate(self.max_depth);
    }

    /// Make `name` the active state without recording a visit
    pub fn set_state(&mut self, name: &str) {
        self.state = Some(name.to_string());
    }

    /// Append a visited state, keeping only the most recent entries.
    /// The visited state becomes the active one.
    pub fn add_state(&mut self, name: &str) {
        self.set_state(name);
        self.history.push(HistoryEntry {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        if self.history.len() > HISTORY_LIMIT {
            self.history.drain(..self.history.len() - HISTORY_LIMIT);
        }
    }

    // ==================== Reads ====================

    /// Values of an entity, newest first.
    ///
    /// Scanning stops at the first value older than `max_age` or once `limit`
    /// values were collected. Values listed in `ignored` are skipped and do
    /// not count toward the limit.
    pub fn get_all(
        &self,
        name: &str,
        max_age: Option<u64>,
        limit: Option<usize>,
        ignored: &[Value],
    ) -> Vec<&EntityValue> {
        let mut found = Vec::new();
        let Some(log) = self.entities.get(name) else {
            return found;
        };
        for item in log {
            if max_age.is_some_and(|max| item.age(self.counter) > max) {
                break;
            }
            if ignored.contains(&item.value) {
                tracing::debug!(entity = name, value = %item.value, "Skipping ignored entity value");
                continue;
            }
            found.push(item);
            if limit.is_some_and(|limit| found.len() >= limit) {
                break;
            }
        }
        found
    }

    /// Most recent value no older than `max_age`
    pub fn get(&self, name: &str, max_age: Option<u64>) -> Option<&EntityValue> {
        self.get_all(name, max_age, Some(1), &[]).into_iter().next()
    }

    /// JSON value of the most recent observation
    pub fn value(&self, name: &str, max_age: Option<u64>) -> Option<&Value> {
        self.get(name, max_age).map(|v| &v.value)
    }

    /// Most recent value together with its age
    pub fn get_age(&self, name: &str, max_age: Option<u64>) -> Option<(&EntityValue, u64)> {
        self.get(name, max_age).map(|v| (v, v.age(self.counter)))
    }

    /// Distinct values sharing the smallest observed age, oldest first.
    ///
    /// Summarizes "what was just said" without repeats.
    pub fn get_all_first(&self, name: &str, max_age: Option<u64>) -> Vec<&EntityValue> {
        let mut found: Vec<&EntityValue> = Vec::new();
        let Some(log) = self.entities.get(name) else {
            return found;
        };
        let mut found_age = None;
        for item in log {
            let age = item.age(self.counter);
            if max_age.is_some_and(|max| age > max) {
                break;
            }
            if found_age.is_some_and(|first| age > first) {
                break;
            }
            found_age = Some(age);
            if found.iter().any(|f| f.value == item.value) {
                continue;
            }
            found.push(item);
        }
        found.reverse();
        found
    }

    pub fn has_any(&self, names: &[&str], max_age: Option<u64>) -> bool {
        names.iter().any(|name| self.get(name, max_age).is_some())
    }

    pub fn has_all(&self, names: &[&str], max_age: Option<u64>) -> bool {
        names.iter().all(|name| self.get(name, max_age).is_some())
    }

    /// History entry at an offset: non-negative from the oldest, negative from the newest
    pub fn history_state(&self, offset: i64) -> Option<&HistoryEntry> {
        let len = self.history.len();
        let index = if offset >= 0 {
            usize::try_from(offset).ok()?
        } else {
            let back = usize::try_from(offset.unsigned_abs()).ok()?;
            len.checked_sub(back)?
        };
        self.history.get(index)
    }

    /// Fluent temporal query over one entity
    pub fn query(&self, name: &str) -> EntityQuery<'_> {
        EntityQuery::new(self, name)
    }

    /// Human readable head of every entity log, used in diagnostics
    pub fn summary(&self, max_age: u64) -> String {
        let mut out = String::new();
        for name in self.entities.keys() {
            let head = self.get_all_first(name, Some(max_age));
            let Some(first) = head.first() else {
                continue;
            };
            let values: Vec<String> = head.iter().map(|v| v.value.to_string()).collect();
            let _ = write!(
                out,
                "{name} (age {}): {}; ",
                first.age(self.counter),
                values.join(", ")
            );
        }
        out.trim_end_matches("; ").to_string()
    }
}
