//! # cyberdeck-providers
//!
//! Telemetry decoders for the cyberdeck bus.
//!
//! Each decode pipeline tags its output lines with its subsystem id. The
//! subscriber picks a [`Decoder`] per tag and turns the payload into a line
//! for the mapping sink:
//! - APRS: already formatted, forwarded after the decoder prefix is removed
//! - Radiosonde: JSON telemetry, rendered as a compressed position report
//! - AIS: AIVDM/AIVDO sentences, rendered as a compressed position report
//!
//! Nothing here performs I/O.

pub mod ais;
pub mod aprs;
pub mod error;
pub mod radiosonde;

pub use error::DecodeError;

use cyberdeck_core::PositionReport;

/// Decode routine selected by a packet's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decoder {
    Aprs,
    Radiosonde,
    Ais,
}

/// What a decoder produced for one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Ready-made APRS text.
    Raw(String),
    /// Position to be encoded for the mapping sink.
    Report(PositionReport),
}

impl Decoded {
    /// Render the line sent to the mapping sink.
    pub fn render(&self, destination: &str) -> Result<String, DecodeError> {
        match self {
            Decoded::Raw(text) => Ok(text.clone()),
            Decoded::Report(report) => aprs::encode_compressed(report, destination),
        }
    }
}

impl Decoder {
    /// Decoder for a process kind (`s_kind`). Kinds without bus output
    /// have none.
    pub fn for_kind(kind: &str) -> Option<Self> {
        match kind {
            "aprs" => Some(Decoder::Aprs),
            "radiosonde" => Some(Decoder::Radiosonde),
            "ais" => Some(Decoder::Ais),
            _ => None,
        }
    }

    pub fn decode(&self, payload: &str) -> Result<Decoded, DecodeError> {
        match self {
            Decoder::Aprs => aprs::strip_prefix(payload).map(|s| Decoded::Raw(s.to_string())),
            Decoder::Radiosonde => radiosonde::decode(payload).map(Decoded::Report),
            Decoder::Ais => ais::decode(payload).map(|pos| Decoded::Report(pos.to_report())),
        }
    }
}
