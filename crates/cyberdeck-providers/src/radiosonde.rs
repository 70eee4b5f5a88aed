//! Radiosonde telemetry from the sonde decoders' `--json` output.

use crate::DecodeError;
use cyberdeck_core::{PositionReport, DEFAULT_PATH};
use serde::Deserialize;

const FEET_PER_METER: f64 = 3.28084;

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    sonde_type: String,
    lat: f64,
    lon: f64,
    alt: f64,
    heading: f64,
}

/// Decode one JSON frame into a balloon position report.
pub fn decode(payload: &str) -> Result<PositionReport, DecodeError> {
    let frame: Frame = serde_json::from_str(payload.trim())?;

    Ok(PositionReport {
        source: frame.sonde_type,
        latitude: frame.lat,
        longitude: frame.lon,
        altitude_ft: (frame.alt * FEET_PER_METER) as i64,
        course_deg: frame.heading as i64,
        symbol_table: '/',
        symbol_id: 'O',
        path: DEFAULT_PATH.to_string(),
    })
}
