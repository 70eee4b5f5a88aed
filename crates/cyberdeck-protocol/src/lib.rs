//! # cyberdeck-protocol
//!
//! Message types and codec for the cyberdeck.
//!
//! This crate defines the telemetry bus frames, the snapshot broadcast and
//! the `{"success": ...}` result envelope returned to API callers.

pub mod codec;
pub mod messages;

pub use codec::CodecError;
pub use messages::*;
