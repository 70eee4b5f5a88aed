//! Message types.
//!
//! - API callers receive a [`Response`] envelope
//! - Snapshot clients receive a [`SnapshotMessage`] every publisher period
//!
//! Bus frames carry a bare [`cyberdeck_core::Packet`].

use chrono::{DateTime, Utc};
use cyberdeck_core::model::rfc3339_millis;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result envelope: `{"success": bool, ...}`.
///
/// Failures carry a human-readable `message`; successes carry zero or more
/// named payload fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Response {
    /// Empty success.
    pub fn ok() -> Self {
        Self {
            success: true,
            body: Map::new(),
        }
    }

    /// Failure with a reason.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            body: Map::new(),
        }
        .with("message", message.into())
    }

    /// Add a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

/// Config and status of one subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigStatusEntry {
    pub id: String,
    pub config: Value,
    pub status: Value,
}

/// Periodic full-registry broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMessage {
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub configstatus: Vec<ConfigStatusEntry>,
}

impl SnapshotMessage {
    pub fn new(configstatus: Vec<ConfigStatusEntry>) -> Self {
        Self {
            timestamp: Utc::now(),
            configstatus,
        }
    }

    pub fn entry(&self, id: &str) -> Option<&ConfigStatusEntry> {
        self.configstatus.iter().find(|e| e.id == id)
    }
}
