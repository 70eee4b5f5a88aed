//! Configuration document and storage abstraction.
//!
//! The document is a single TOML file:
//! - `[server]` holds [`ServerSettings`]
//! - every other table is one subsystem's [`ConfigRecord`], in file order
//!
//! Values may be written as strings (parsed by type tag exactly like
//! `set_config`) or as native TOML scalars of the matching type. `l_` values
//! may also be native arrays or tables.

use crate::config::{ConfigError, ConfigRecord, ConfigValue, TypeTag, KEY_ID, KEY_KIND, KEY_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Table name reserved for [`ServerSettings`].
pub const SERVER_TABLE: &str = "server";

/// Abstract configuration storage.
///
/// All methods are synchronous; async callers wrap them at the runtime layer.
pub trait ConfigStorage: Send + Sync {
    /// Load the whole document.
    fn load(&self) -> Result<ConfigDocument, ConfigError>;

    /// Replace the stored document.
    fn save(&self, document: &ConfigDocument) -> Result<(), ConfigError>;
}

/// Host-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// REST façade bind address.
    pub host: String,
    /// REST façade port.
    pub port: u16,
    /// Directory holding `start_<id>.sh` / `stop_<id>.sh` application scripts.
    pub scripts_dir: PathBuf,
    /// Command used as the last stage of forwarding pipelines.
    pub forwarder_command: String,
    /// Input device name that selects the onboard sound card.
    pub soundcard: String,
    /// Grace period between terminate and kill when stopping pipelines.
    pub stop_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            scripts_dir: PathBuf::from("scripts"),
            forwarder_command: "cyberdeck-forwarder".to_string(),
            soundcard: "soundcard".to_string(),
            stop_grace_ms: 2000,
        }
    }
}

/// One subsystem table.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Table name in the file. Informational; identity is `s_id`.
    pub name: String,
    pub record: ConfigRecord,
}

/// The full configuration document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    pub server: ServerSettings,
    pub sections: Vec<Section>,
}

impl ConfigDocument {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table =
            toml::from_str(text).map_err(|e| ConfigError::InvalidData(e.to_string()))?;

        let mut document = ConfigDocument::default();
        let mut seen = HashSet::new();

        for (name, value) in table {
            if name == SERVER_TABLE {
                document.server = value
                    .try_into()
                    .map_err(|e: toml::de::Error| ConfigError::InvalidData(e.to_string()))?;
                continue;
            }

            let toml::Value::Table(entries) = value else {
                return Err(ConfigError::InvalidData(format!(
                    "top-level key {name} is not a table"
                )));
            };

            let record = record_from_table(&entries)?;
            for key in [KEY_ID, KEY_TYPE, KEY_KIND] {
                if record.get_str(key).is_none() {
                    return Err(ConfigError::MissingKey {
                        section: name.clone(),
                        key: key.to_string(),
                    });
                }
            }
            if !seen.insert(record.id().to_string()) {
                return Err(ConfigError::DuplicateId(record.id().to_string()));
            }

            document.sections.push(Section { name, record });
        }

        Ok(document)
    }

    /// Render as TOML with native scalars. `l_` values become JSON strings.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let mut table = toml::Table::new();

        let server = toml::Value::try_from(&self.server)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        table.insert(SERVER_TABLE.to_string(), server);

        for section in &self.sections {
            let mut entries = toml::Table::new();
            for (key, value) in section.record.iter() {
                entries.insert(key.to_string(), value_to_toml(value));
            }
            table.insert(section.name.clone(), toml::Value::Table(entries));
        }

        toml::to_string(&table).map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    pub fn records(&self) -> impl Iterator<Item = &ConfigRecord> {
        self.sections.iter().map(|s| &s.record)
    }
}

fn record_from_table(entries: &toml::Table) -> Result<ConfigRecord, ConfigError> {
    let mut record = ConfigRecord::new();
    for (key, value) in entries {
        let tag = TypeTag::of_key(key).ok_or_else(|| ConfigError::InvalidTypeTag(key.clone()))?;
        record.insert(key, value_from_toml(key, tag, value)?)?;
    }
    Ok(record)
}

fn value_from_toml(key: &str, tag: TypeTag, value: &toml::Value) -> Result<ConfigValue, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        raw: value.to_string(),
    };

    match (tag, value) {
        (_, toml::Value::String(raw)) => tag.parse(key, raw),
        (TypeTag::Int, toml::Value::Integer(i)) => Ok(ConfigValue::Int(*i)),
        (TypeTag::Float, toml::Value::Float(f)) => Ok(ConfigValue::Float(*f)),
        (TypeTag::Float, toml::Value::Integer(i)) => Ok(ConfigValue::Float(*i as f64)),
        (TypeTag::Bool, toml::Value::Boolean(b)) => Ok(ConfigValue::Bool(*b)),
        (TypeTag::List, toml::Value::Array(_) | toml::Value::Table(_)) => serde_json::to_value(value)
            .map(ConfigValue::List)
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn value_to_toml(value: &ConfigValue) -> toml::Value {
    match value {
        ConfigValue::String(s) => toml::Value::String(s.clone()),
        ConfigValue::Float(f) => toml::Value::Float(*f),
        ConfigValue::Bool(b) => toml::Value::Boolean(*b),
        ConfigValue::Int(i) => toml::Value::Integer(*i),
        ConfigValue::List(v) => toml::Value::String(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::RwLock;

    const SAMPLE: &str = r#"
[server]
port = 9000
stop_grace_ms = 500

[rf]
s_id = "rf"
s_type = "device"
s_kind = "rf"
s_rf1_serial = "00000001"
i_polling_period = 2

[aprs]
s_id = "aprs"
s_type = "process"
s_kind = "aprs"
s_device = "00000001"
i_freq = "144800000"
f_gain = 42
b_autostart = "no"

[acars]
s_id = "acars"
s_type = "process"
s_kind = "acars"
l_freqs = [131525000, 131725000]
"#;

    /// In-memory storage for testing.
    struct MemoryConfigStorage {
        text: RwLock<String>,
    }

    impl ConfigStorage for MemoryConfigStorage {
        fn load(&self) -> Result<ConfigDocument, ConfigError> {
            ConfigDocument::from_toml_str(&self.text.read().unwrap())
        }

        fn save(&self, document: &ConfigDocument) -> Result<(), ConfigError> {
            *self.text.write().unwrap() = document.to_toml_string()?;
            Ok(())
        }
    }

    #[test]
    fn test_load_sample() {
        let doc = ConfigDocument::from_toml_str(SAMPLE).unwrap();
        assert_eq!(doc.server.port, 9000);
        assert_eq!(doc.server.stop_grace_ms, 500);
        assert_eq!(doc.server.host, "127.0.0.1");

        let ids: Vec<_> = doc.records().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["rf", "aprs", "acars"]);

        let aprs = &doc.sections[1].record;
        assert_eq!(aprs.get_i64("i_freq"), Some(144_800_000));
        assert_eq!(aprs.get_f64("f_gain"), Some(42.0));
        assert_eq!(aprs.get_bool("b_autostart"), Some(false));

        let acars = &doc.sections[2].record;
        assert_eq!(
            acars.get_json("l_freqs"),
            Some(&serde_json::json!([131525000, 131725000]))
        );
    }

    #[test]
    fn test_missing_server_table_uses_defaults() {
        let doc = ConfigDocument::from_toml_str(
            "[clock]\ns_id = \"clock\"\ns_type = \"device\"\ns_kind = \"clock\"\n",
        )
        .unwrap();
        assert_eq!(doc.server, ServerSettings::default());
        assert_eq!(doc.sections.len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let text = r#"
[a]
s_id = "x"
s_type = "device"
s_kind = "clock"

[b]
s_id = "x"
s_type = "device"
s_kind = "host"
"#;
        assert_eq!(
            ConfigDocument::from_toml_str(text).unwrap_err(),
            ConfigError::DuplicateId("x".to_string())
        );
    }

    #[test]
    fn test_missing_required_key_rejected() {
        let text = "[a]\ns_id = \"a\"\ns_type = \"device\"\n";
        assert_eq!(
            ConfigDocument::from_toml_str(text).unwrap_err(),
            ConfigError::MissingKey {
                section: "a".to_string(),
                key: "s_kind".to_string()
            }
        );
    }

    #[test]
    fn test_bad_values_rejected() {
        let bad_tag = "[a]\ns_id = \"a\"\ns_type = \"device\"\ns_kind = \"clock\"\nperiod = 2\n";
        assert_eq!(
            ConfigDocument::from_toml_str(bad_tag).unwrap_err(),
            ConfigError::InvalidTypeTag("period".to_string())
        );

        let bad_type = "[a]\ns_id = \"a\"\ns_type = \"device\"\ns_kind = \"clock\"\ni_period = true\n";
        assert!(matches!(
            ConfigDocument::from_toml_str(bad_type),
            Err(ConfigError::InvalidValue { .. })
        ));

        assert!(matches!(
            ConfigDocument::from_toml_str("[a"),
            Err(ConfigError::InvalidData(_))
        ));
        assert!(matches!(
            ConfigDocument::from_toml_str("loose = 1"),
            Err(ConfigError::InvalidData(_))
        ));
    }

    #[test]
    fn test_storage_save_and_reload() {
        let storage = MemoryConfigStorage {
            text: RwLock::new(SAMPLE.to_string()),
        };
        let mut doc = storage.load().unwrap();
        doc.sections[1]
            .record
            .set_config("i_freq", "145825000", &[])
            .unwrap();
        storage.save(&doc).unwrap();

        let text = storage.text.read().unwrap().clone();
        assert!(text.contains("i_freq = 145825000"));
        assert!(text.contains("l_freqs = \"[131525000,131725000]\""));

        // Keys are written back in file order.
        let aprs = &text[text.find("[aprs]").unwrap()..];
        let at = |key: &str| aprs.find(key).unwrap();
        assert!(at("s_device") < at("i_freq"));
        assert!(at("i_freq") < at("f_gain"));
        assert!(at("f_gain") < at("b_autostart"));

        let reloaded = storage.load().unwrap();
        assert_eq!(reloaded, doc);
    }
}
