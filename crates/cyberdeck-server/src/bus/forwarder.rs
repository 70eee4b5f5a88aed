//! Fire-and-forget Packet publisher.

use std::time::Duration;

use cyberdeck_core::Packet;
use cyberdeck_protocol::codec::encode_packet;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Packets queued while the Proxy is slow or unreachable.
pub const DEFAULT_QUEUE: usize = 1024;

const SEND_ATTEMPTS: usize = 3;
const RECONNECT_DELAY: Duration = Duration::from_millis(200);

type Connection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Publishes tagged Packets to the Proxy's inbound endpoint.
///
/// `publish` never waits: a full queue drops the Packet.
pub struct Forwarder {
    tag: String,
    queue: mpsc::Sender<Packet>,
    writer: JoinHandle<()>,
}

impl Forwarder {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(tag: impl Into<String>, endpoint: impl Into<String>, capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(run_writer(endpoint.into(), rx));
        Self {
            tag: tag.into(),
            queue,
            writer,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Queue one payload under this forwarder's tag. Returns false if dropped.
    pub fn publish(&self, payload: impl Into<String>) -> bool {
        match self.queue.try_send(Packet::new(self.tag.clone(), payload)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Forwarder {} queue full, packet dropped", self.tag);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Send everything still queued, then disconnect.
    pub async fn close(self) {
        drop(self.queue);
        if let Err(e) = self.writer.await {
            warn!("Forwarder {} writer failed: {}", self.tag, e);
        }
    }
}

async fn run_writer(endpoint: String, mut rx: mpsc::Receiver<Packet>) {
    let mut connection: Option<Connection> = None;

    while let Some(packet) = rx.recv().await {
        let text = match encode_packet(&packet) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode packet for {}: {}", packet.tag, e);
                continue;
            }
        };

        let mut delivered = false;
        for _ in 0..SEND_ATTEMPTS {
            if connection.is_none() {
                match tokio_tungstenite::connect_async(endpoint.as_str()).await {
                    Ok((ws, _)) => {
                        debug!("Forwarder connected to {}", endpoint);
                        connection = Some(ws);
                    }
                    Err(e) => {
                        debug!("Forwarder cannot reach {}: {}", endpoint, e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                }
            }
            if let Some(ws) = connection.as_mut() {
                match ws.send(Message::Text(text.clone())).await {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(e) => {
                        debug!("Forwarder send failed: {}", e);
                        connection = None;
                    }
                }
            }
        }
        if !delivered {
            debug!("Packet for {} dropped after {} attempts", packet.tag, SEND_ATTEMPTS);
        }
    }

    if let Some(mut ws) = connection {
        let _ = ws.close(None).await;
    }
}
