//! APRS passthrough and compressed position encoding.

use crate::DecodeError;
use cyberdeck_core::PositionReport;

/// Length of the channel prefix the APRS decoder puts in front of every
/// frame, e.g. `[0.4] `.
pub const PREFIX_LEN: usize = 6;

/// Compression type byte: current fix, GLL source, compressed origin.
const COMPRESSION_TYPE: u8 = 0b0010_1000;

/// Drop the decoder prefix from an APRS line. A line with nothing after the
/// prefix is truncated.
pub fn strip_prefix(payload: &str) -> Result<&str, DecodeError> {
    let start = payload
        .char_indices()
        .nth(PREFIX_LEN)
        .map(|(i, _)| i)
        .ok_or_else(|| DecodeError::Truncated(payload.to_string()))?;
    Ok(&payload[start..])
}

/// Render `report` in the APRS compressed position format.
///
/// `SRC>DEST,PATH:!` then the symbol table, base-91 latitude and longitude,
/// symbol id, course/speed bytes, compression type and an `/A=` altitude
/// comment in feet.
pub fn encode_compressed(report: &PositionReport, destination: &str) -> Result<String, DecodeError> {
    let (lat, lon) = (report.latitude, report.longitude);
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(DecodeError::OutOfRange {
            latitude: lat,
            longitude: lon,
        });
    }

    let y = (380_926.0 * (90.0 - lat)).round() as u32;
    let x = (190_463.0 * (180.0 + lon)).round() as u32;
    let course = (report.course_deg.rem_euclid(360) / 4) as u8 + 33;

    let mut out = String::with_capacity(64);
    out.push_str(&report.source);
    out.push('>');
    out.push_str(destination);
    if !report.path.is_empty() {
        out.push(',');
        out.push_str(&report.path);
    }
    out.push_str(":!");
    out.push(report.symbol_table);
    out.push_str(&base91(y));
    out.push_str(&base91(x));
    out.push(report.symbol_id);
    out.push(course as char);
    // Speed is not reported.
    out.push('!');
    out.push((COMPRESSION_TYPE + 33) as char);
    out.push_str(&format!("/A={:06}", report.altitude_ft));
    Ok(out)
}

/// Four base-91 digits, most significant first.
fn base91(mut value: u32) -> String {
    let mut digits = [0u8; 4];
    for digit in digits.iter_mut().rev() {
        *digit = (value % 91) as u8 + 33;
        value /= 91;
    }
    digits.iter().map(|&b| b as char).collect()
}
