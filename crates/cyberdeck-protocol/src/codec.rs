//! JSON codec for bus and snapshot frames.
//!
//! Every frame is a single JSON document sent as one WebSocket text message.

use crate::messages::SnapshotMessage;
use cyberdeck_core::Packet;
use thiserror::Error;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a packet for transmission to the proxy.
pub fn encode_packet(packet: &Packet) -> Result<String, CodecError> {
    serde_json::to_string(packet).map_err(CodecError::from)
}

/// Decode a packet received from the proxy.
pub fn decode_packet(text: &str) -> Result<Packet, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

pub fn encode_snapshot(snapshot: &SnapshotMessage) -> Result<String, CodecError> {
    serde_json::to_string(snapshot).map_err(CodecError::from)
}

pub fn decode_snapshot(text: &str) -> Result<SnapshotMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}
