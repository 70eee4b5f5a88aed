//! Live subsystem status.
//!
//! A [`Status`] is an untyped, ordered map of native JSON values. Each
//! subsystem keeps its current status in a [`StatusCell`]; writers always
//! publish a whole new `Status`, so readers never observe a half-applied
//! update.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mapping of status key to its current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status {
    fields: BTreeMap<String, Value>,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Add `by` to an integer counter, creating it at zero.
    pub fn increment(&mut self, key: &str, by: u64) -> u64 {
        let next = self.get_u64(key).unwrap_or(0) + by;
        self.set(key, next);
        next
    }

    /// `running` flag shared by processes and applications.
    pub fn is_running(&self) -> bool {
        self.get_bool("running").unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Holder for a subsystem's current status snapshot.
#[derive(Debug)]
pub struct StatusCell {
    current: ArcSwap<Status>,
}

impl StatusCell {
    pub fn new(initial: Status) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Consistent snapshot of the current status.
    pub fn load(&self) -> Arc<Status> {
        self.current.load_full()
    }

    /// Publish a fully built status.
    pub fn replace(&self, status: Status) {
        self.current.store(Arc::new(status));
    }

    /// Read-copy-update. `f` may run more than once under contention and
    /// must not have side effects.
    pub fn update<F>(&self, f: F) -> Arc<Status>
    where
        F: Fn(&mut Status),
    {
        let mut published = None;
        self.current.rcu(|current| {
            let mut next = Status::clone(current);
            f(&mut next);
            let next = Arc::new(next);
            published = Some(Arc::clone(&next));
            next
        });
        published.unwrap_or_else(|| self.load())
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(Status::new())
    }
}
