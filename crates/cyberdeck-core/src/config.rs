//! Typed configuration records.
//!
//! Every configuration key starts with a two-character type tag that decides
//! how the textual form of a value is parsed and how it is written back:
//! - `s_` string
//! - `f_` float
//! - `b_` boolean
//! - `i_` integer
//! - `l_` structured JSON (lists and objects)
//!
//! The mutation protocol ([`ConfigRecord::set_config`]) is shared by every
//! subsystem variant; variants only differ in which keys they lock.

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

/// Unique subsystem identifier.
pub const KEY_ID: &str = "s_id";
/// Subsystem variant (`device`, `process`, `application`).
pub const KEY_TYPE: &str = "s_type";
/// Variant-specific implementation selector (e.g. `rf`, `aprs`, `script`).
pub const KEY_KIND: &str = "s_kind";

/// Keys that can never be changed through `set_config`.
pub const ALWAYS_IMMUTABLE: &[&str] = &[KEY_ID, KEY_TYPE, KEY_KIND];

/// Errors raised while loading or mutating configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The key is locked for this subsystem.
    #[error("Modification of {0} is not allowed")]
    ImmutableKey(String),

    /// The key does not exist in the target record.
    #[error("Key {0} not present in target configuration")]
    UnknownKey(String),

    /// The raw text could not be parsed according to the key's type tag.
    #[error("Value {raw:?} is not valid for key {key}")]
    InvalidValue { key: String, raw: String },

    /// The key does not start with a known type tag.
    #[error("Invalid type tag in key {0}")]
    InvalidTypeTag(String),

    /// A required key is missing from a subsystem section.
    #[error("Section {section} is missing required key {key}")]
    MissingKey { section: String, key: String },

    /// Two sections declare the same `s_id`.
    #[error("Duplicate subsystem id {0}")]
    DuplicateId(String),

    /// Failed to read configuration.
    #[error("Read error: {0}")]
    ReadError(String),

    /// Failed to write configuration.
    #[error("Write error: {0}")]
    WriteError(String),

    /// Configuration document is malformed.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Type tag derived from a key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Float,
    Bool,
    Int,
    List,
}

impl TypeTag {
    /// Derive the tag from the first two characters of a key.
    pub fn of_key(key: &str) -> Option<Self> {
        match key.get(..2)? {
            "s_" => Some(TypeTag::String),
            "f_" => Some(TypeTag::Float),
            "b_" => Some(TypeTag::Bool),
            "i_" => Some(TypeTag::Int),
            "l_" => Some(TypeTag::List),
            _ => None,
        }
    }

    /// Parse the textual form of a value for `key`.
    pub fn parse(self, key: &str, raw: &str) -> Result<ConfigValue, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            raw: raw.to_string(),
        };

        match self {
            TypeTag::String => Ok(ConfigValue::String(raw.to_string())),
            TypeTag::Float => raw
                .trim()
                .parse::<f64>()
                .map(ConfigValue::Float)
                .map_err(|_| invalid()),
            TypeTag::Bool => parse_bool(raw).map(ConfigValue::Bool).ok_or_else(invalid),
            TypeTag::Int => raw
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Int)
                .map_err(|_| invalid()),
            TypeTag::List => serde_json::from_str(raw)
                .map(ConfigValue::List)
                .map_err(|_| invalid()),
        }
    }
}

/// Parse a boolean from the accepted literal set, case-insensitively.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// A configuration value. Serializes to its native JSON form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    String(String),
    Float(f64),
    Bool(bool),
    Int(i64),
    List(serde_json::Value),
}

impl ConfigValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            ConfigValue::String(_) => TypeTag::String,
            ConfigValue::Float(_) => TypeTag::Float,
            ConfigValue::Bool(_) => TypeTag::Bool,
            ConfigValue::Int(_) => TypeTag::Int,
            ConfigValue::List(_) => TypeTag::List,
        }
    }

    /// Textual form that [`TypeTag::parse`] accepts back.
    pub fn to_raw(&self) -> String {
        match self {
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Float(f) => f.to_string(),
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::List(v) => v.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floats, with integers widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ConfigValue::List(v) => Some(v),
            _ => None,
        }
    }
}

/// One subsystem's static parameters, in the order they were loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigRecord {
    values: IndexMap<String, ConfigValue>,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from textual key/value pairs, parsing each by tag.
    pub fn from_raw<I, K, V>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut record = Self::new();
        for (key, raw) in entries {
            let key = key.as_ref();
            let tag =
                TypeTag::of_key(key).ok_or_else(|| ConfigError::InvalidTypeTag(key.to_string()))?;
            let value = tag.parse(key, raw.as_ref())?;
            record.values.insert(key.to_string(), value);
        }
        Ok(record)
    }

    /// Insert a typed value. The value must match the key's tag.
    pub fn insert(&mut self, key: &str, value: ConfigValue) -> Result<(), ConfigError> {
        let tag = TypeTag::of_key(key).ok_or_else(|| ConfigError::InvalidTypeTag(key.to_string()))?;
        if tag != value.tag() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                raw: value.to_raw(),
            });
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// The subsystem id, or an empty string when the record has none.
    pub fn id(&self) -> &str {
        self.get_str(KEY_ID).unwrap_or_default()
    }

    pub fn subsystem_type(&self) -> Option<&str> {
        self.get_str(KEY_TYPE)
    }

    pub fn kind(&self) -> Option<&str> {
        self.get_str(KEY_KIND)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfigValue::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ConfigValue::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ConfigValue::as_bool)
    }

    pub fn get_json(&self, key: &str) -> Option<&serde_json::Value> {
        self.get(key).and_then(ConfigValue::as_json)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply a textual update to an existing key.
    ///
    /// `immutable` lists keys locked by the owning variant in addition to
    /// [`ALWAYS_IMMUTABLE`]. Immutability is checked before existence, so a
    /// locked key is rejected whatever the value is.
    pub fn set_config(
        &mut self,
        key: &str,
        raw: &str,
        immutable: &[&str],
    ) -> Result<&Self, ConfigError> {
        if ALWAYS_IMMUTABLE.contains(&key) || immutable.contains(&key) {
            return Err(ConfigError::ImmutableKey(key.to_string()));
        }
        if !self.values.contains_key(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let tag = TypeTag::of_key(key).ok_or_else(|| ConfigError::InvalidTypeTag(key.to_string()))?;
        let value = tag.parse(key, raw)?;
        self.values.insert(key.to_string(), value);
        Ok(self)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
