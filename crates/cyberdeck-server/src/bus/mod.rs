//! Telemetry bus.
//!
//! Forwarders publish [`Packet`](cyberdeck_core::Packet)s to the Proxy's
//! inbound endpoint; the Proxy relays every frame unchanged to all consumers
//! attached to its outbound endpoint; the Subscriber decodes them for the
//! mapping sink. Each Packet travels as one JSON WebSocket text frame.

pub mod forwarder;
pub mod proxy;
pub mod subscriber;

pub use forwarder::Forwarder;
pub use proxy::{Proxy, ProxyHandle};
pub use subscriber::{MappingSink, Subscriber};

use cyberdeck_protocol::CodecError;
use thiserror::Error;

/// Transport errors on the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
