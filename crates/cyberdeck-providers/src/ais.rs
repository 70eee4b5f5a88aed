//! AIS position decoding from AIVDM/AIVDO sentences.
//!
//! Supports single-fragment class A position reports (types 1, 2, 3) and
//! class B position reports (type 18).

use crate::DecodeError;
use cyberdeck_core::{PositionReport, DEFAULT_PATH};

/// Heading value meaning "not available".
pub const HEADING_UNAVAILABLE: u16 = 511;

const LON_UNAVAILABLE: i64 = 181 * 600_000;
const LAT_UNAVAILABLE: i64 = 91 * 600_000;
const POSITION_REPORT_BITS: usize = 168;

/// Position fields of a decoded AIS message.
#[derive(Debug, Clone, PartialEq)]
pub struct AisPosition {
    pub message_type: u8,
    pub mmsi: u32,
    pub latitude: f64,
    pub longitude: f64,
    /// True heading, `None` when the vessel does not report one.
    pub heading: Option<u16>,
}

impl AisPosition {
    /// Vessel report: yacht symbol at a nominal 1 m altitude.
    pub fn to_report(&self) -> PositionReport {
        PositionReport {
            source: self.mmsi.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            altitude_ft: 3,
            course_deg: i64::from(self.heading.unwrap_or(0)),
            symbol_table: '/',
            symbol_id: 'Y',
            path: DEFAULT_PATH.to_string(),
        }
    }
}

/// Decode one NMEA sentence.
pub fn decode(sentence: &str) -> Result<AisPosition, DecodeError> {
    let payload = unwrap_sentence(sentence.trim())?;
    let bits = Bits::dearmor(payload)?;

    let message_type = bits.unsigned(0, 6)? as u8;
    let (lon_at, lat_at, heading_at) = match message_type {
        1..=3 => (61, 89, 128),
        18 => (57, 85, 124),
        other => return Err(DecodeError::UnsupportedType(other)),
    };
    if bits.len() < POSITION_REPORT_BITS {
        return Err(DecodeError::Truncated(format!(
            "{} bits in type {message_type} message",
            bits.len()
        )));
    }

    let lon = bits.signed(lon_at, 28)?;
    let lat = bits.signed(lat_at, 27)?;
    if lon == LON_UNAVAILABLE || lat == LAT_UNAVAILABLE {
        return Err(DecodeError::PositionUnavailable);
    }
    let (latitude, longitude) = (lat as f64 / 600_000.0, lon as f64 / 600_000.0);
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(DecodeError::OutOfRange {
            latitude,
            longitude,
        });
    }

    let heading = bits.unsigned(heading_at, 9)? as u16;

    Ok(AisPosition {
        message_type,
        mmsi: bits.unsigned(8, 30)? as u32,
        latitude,
        longitude,
        heading: (heading != HEADING_UNAVAILABLE).then_some(heading),
    })
}

/// Validate framing and checksum, return the armoured payload field.
fn unwrap_sentence(sentence: &str) -> Result<&str, DecodeError> {
    let body = sentence
        .strip_prefix('!')
        .ok_or_else(|| DecodeError::Malformed("missing '!' start delimiter".to_string()))?;
    let (body, checksum) = body
        .split_once('*')
        .ok_or_else(|| DecodeError::Malformed("missing checksum".to_string()))?;

    let expected = u8::from_str_radix(checksum.trim(), 16)
        .map_err(|_| DecodeError::Malformed(format!("bad checksum field {checksum:?}")))?;
    let computed = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if expected != computed {
        return Err(DecodeError::Checksum { expected, computed });
    }

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() != 7 {
        return Err(DecodeError::Malformed(format!(
            "expected 7 fields, found {}",
            fields.len()
        )));
    }
    let talker = fields[0];
    if talker.len() != 5 || !(talker.ends_with("VDM") || talker.ends_with("VDO")) {
        return Err(DecodeError::Malformed(format!("not an AIS sentence: {talker}")));
    }
    if fields[1] != "1" {
        return Err(DecodeError::MultiFragment);
    }

    Ok(fields[5])
}

/// De-armoured payload, one 6-bit group per byte.
struct Bits {
    sextets: Vec<u8>,
}

impl Bits {
    fn dearmor(payload: &str) -> Result<Self, DecodeError> {
        let sextets = payload
            .bytes()
            .map(|c| match c {
                b'0'..=b'W' => Ok(c - 48),
                b'`'..=b'w' => Ok(c - 56),
                other => Err(DecodeError::Malformed(format!(
                    "invalid payload character {:?}",
                    other as char
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sextets })
    }

    fn len(&self) -> usize {
        self.sextets.len() * 6
    }

    fn unsigned(&self, start: usize, width: usize) -> Result<u64, DecodeError> {
        if start + width > self.len() {
            return Err(DecodeError::Truncated(format!(
                "field at bit {start} exceeds {} bits",
                self.len()
            )));
        }
        let mut value = 0u64;
        for bit in start..start + width {
            let sextet = self.sextets[bit / 6];
            let set = (sextet >> (5 - bit % 6)) & 1;
            value = (value << 1) | u64::from(set);
        }
        Ok(value)
    }

    /// Two's complement field.
    fn signed(&self, start: usize, width: usize) -> Result<i64, DecodeError> {
        let raw = self.unsigned(start, width)?;
        let shift = 64 - width;
        Ok(((raw << shift) as i64) >> shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASS_A: &str = "!AIVDM,1,1,,A,15RTgt0PAso;90TKcjM8h6g208CQ,0*4A";
    const CLASS_B: &str = "!AIVDM,1,1,,B,B5NJ;PP005l4ot5Isbl03wsUkP06,0*75";

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_decode_class_a() {
        let pos = decode(CLASS_A).unwrap();
        assert_eq!(pos.message_type, 1);
        assert_eq!(pos.mmsi, 371798000);
        assert!(close(pos.longitude, -123.39538333333333));
        assert!(close(pos.latitude, 48.38163333333333));
        assert_eq!(pos.heading, Some(215));
    }

    #[test]
    fn test_decode_class_b_without_heading() {
        let pos = decode(CLASS_B).unwrap();
        assert_eq!(pos.message_type, 18);
        assert_eq!(pos.mmsi, 367430530);
        assert!(close(pos.longitude, -122.26732));
        assert!(close(pos.latitude, 37.785035));
        assert_eq!(pos.heading, None);
        assert_eq!(pos.to_report().course_deg, 0);
    }

    #[test]
    fn test_decode_own_ship_southern_hemisphere() {
        let pos = decode("!AIVDO,1,1,,B,33aDo80000:l8p1d`H4000D00000,0*46").unwrap();
        assert_eq!(pos.message_type, 3);
        assert_eq!(pos.mmsi, 244660000);
        assert!(close(pos.longitude, 151.2));
        assert!(close(pos.latitude, -33.85));
        assert_eq!(pos.heading, Some(10));
    }

    #[test]
    fn test_report_fields() {
        let report = decode(CLASS_A).unwrap().to_report();
        assert_eq!(report.source, "371798000");
        assert_eq!(report.altitude_ft, 3);
        assert_eq!(report.course_deg, 215);
        assert_eq!((report.symbol_table, report.symbol_id), ('/', 'Y'));
    }

    #[test]
    fn test_trailing_whitespace_accepted() {
        assert!(decode(&format!("{CLASS_A}\r\n")).is_ok());
    }

    #[test]
    fn test_checksum_mismatch() {
        let bad = CLASS_B.replace("*75", "*76");
        assert!(matches!(
            decode(&bad),
            Err(DecodeError::Checksum {
                expected: 0x76,
                computed: 0x75
            })
        ));
    }

    #[test]
    fn test_malformed_sentences() {
        for sentence in [
            "",
            "garbage",
            "AIVDM,1,1,,A,15RTgt0PAso;90TKcjM8h6g208CQ,0*4A",
            "!AIVDM,1,1,,A,15RTgt0PAso;90TKcjM8h6g208CQ,0",
            "!AIVDM,1,1,,A,15RTgt0PAso;90TKcjM8h6g208CQ,0*ZZ",
            "!GPGGA,1,1,,A,15RTgt0PAso;90TKcjM8h6g208CQ,0*5E",
        ] {
            assert!(decode(sentence).is_err(), "{sentence:?}");
        }
    }

    #[test]
    fn test_multi_fragment_rejected() {
        let body = "AIVDM,2,1,3,A,15RTgt0PAso;90TKcjM8h6g208CQ,0";
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        let sentence = format!("!{body}*{checksum:02X}");
        assert!(matches!(decode(&sentence), Err(DecodeError::MultiFragment)));
    }

    #[test]
    fn test_unsupported_type() {
        let sentence = "!AIVDM,1,1,,A,50000000000000000000000000000000000000000000000000000000000000000000000,2*11";
        assert!(matches!(decode(sentence), Err(DecodeError::UnsupportedType(5))));
    }

    #[test]
    fn test_position_unavailable() {
        assert!(matches!(
            decode("!AIVDM,1,1,,A,11mg=5@000<tSF0l4Q@00?v00000,0*09"),
            Err(DecodeError::PositionUnavailable)
        ));
    }

    #[test]
    fn test_truncated_payload() {
        assert!(matches!(
            decode("!AIVDM,1,1,,A,15RTgt0PAso,0*0A"),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn test_signed_fields() {
        // 0b111111 as a 6-bit signed field is -1.
        let bits = Bits::dearmor("w").unwrap();
        assert_eq!(bits.unsigned(0, 6).unwrap(), 63);
        assert_eq!(bits.signed(0, 6).unwrap(), -1);
        assert!(bits.unsigned(1, 6).is_err());
    }

    #[test]
    fn test_invalid_armour_character() {
        assert!(Bits::dearmor("X").is_err());
        assert!(Bits::dearmor("x").is_err());
    }
}
