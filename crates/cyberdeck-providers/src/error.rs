use thiserror::Error;

/// Malformed or unsupported telemetry.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload shorter than its fixed framing.
    #[error("Payload truncated: {0}")]
    Truncated(String),

    /// Payload is not the expected JSON document.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Sentence framing is wrong.
    #[error("Malformed sentence: {0}")]
    Malformed(String),

    /// NMEA checksum does not match the sentence body.
    #[error("Checksum mismatch: sentence says {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },

    /// Sentence is one fragment of a multi-part message.
    #[error("Multi-fragment sentences are not supported")]
    MultiFragment,

    /// AIS message type without a position.
    #[error("Unsupported AIS message type {0}")]
    UnsupportedType(u8),

    /// Position fields carry the "not available" marker.
    #[error("Position not available")]
    PositionUnavailable,

    /// Coordinates outside the valid range.
    #[error("Coordinate out of range: lat {latitude}, lon {longitude}")]
    OutOfRange { latitude: f64, longitude: f64 },
}
