//! Bus and subsystem model types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The wire unit of the telemetry bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Id of the originating subsystem.
    pub tag: String,
    /// Creation instant.
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    /// Opaque decoder output, usually one line of text or JSON.
    pub payload: String,
}

impl Packet {
    /// Create a packet stamped with the current time.
    pub fn new(tag: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }
}

/// RFC 3339 with millisecond precision.
pub mod rfc3339_millis {
    use super::*;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// A normalized geolocation message bound for the mapping sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Station or object name (radiosonde type, MMSI).
    pub source: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: i64,
    pub course_deg: i64,
    pub symbol_table: char,
    pub symbol_id: char,
    /// Digipeater path, e.g. `WIDE2-2`.
    pub path: String,
}

/// Default digipeater path for reports generated here.
pub const DEFAULT_PATH: &str = "WIDE2-2";

/// Subsystem variant, as written in `s_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemType {
    Device,
    Process,
    Application,
}

impl SubsystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsystemType::Device => "device",
            SubsystemType::Process => "process",
            SubsystemType::Application => "application",
        }
    }
}

impl fmt::Display for SubsystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubsystemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(SubsystemType::Device),
            "process" => Ok(SubsystemType::Process),
            "application" => Ok(SubsystemType::Application),
            other => Err(format!("unknown subsystem type {other}")),
        }
    }
}
