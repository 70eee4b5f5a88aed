//! Decodes bus traffic into position reports for the mapping sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cyberdeck_core::{ConfigRecord, Packet};
use cyberdeck_protocol::codec::decode_packet;
use cyberdeck_providers::{DecodeError, Decoder};
use futures::StreamExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::sink::PersistenceSink;
use crate::subsystem::{Application, Subsystem};

pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(5000);
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// UDP endpoint that receives `CALL,PASSCODE\n<report>\n` datagrams.
pub struct MappingSink {
    socket: UdpSocket,
    target: String,
    call: String,
    passcode: i64,
}

impl MappingSink {
    /// Bind an ephemeral socket towards `s_mapping_host:i_mapping_port`.
    pub async fn bind(config: &ConfigRecord) -> std::io::Result<Self> {
        let host = config.get_str("s_mapping_host").unwrap_or("127.0.0.1");
        let port = config.get_i64("i_mapping_port").unwrap_or(2023);
        Ok(Self {
            socket: UdpSocket::bind("0.0.0.0:0").await?,
            target: format!("{host}:{port}"),
            call: config.get_str("s_mapping_call").unwrap_or("N0CALL").to_string(),
            passcode: config.get_i64("i_mapping_passcode").unwrap_or(-1),
        })
    }

    /// Callsign used as the report destination.
    pub fn call(&self) -> &str {
        &self.call
    }

    pub fn datagram(&self, report: &str) -> String {
        format!("{},{}\n{}\n", self.call, self.passcode, report)
    }

    pub async fn send(&self, report: &str) -> std::io::Result<()> {
        self.socket
            .send_to(self.datagram(report).as_bytes(), self.target.as_str())
            .await
            .map(drop)
    }
}

/// What happened to one frame.
#[derive(Debug, PartialEq)]
pub enum Delivery {
    Forwarded,
    /// No decoder for the tag.
    Unrouted,
    Rejected,
}

/// The Subscriber loop, bound to its application subsystem.
pub struct Subscriber {
    subsystem: Arc<Subsystem>,
    routes: HashMap<String, Decoder>,
    endpoint: String,
    mapping: MappingSink,
    sink: Arc<dyn PersistenceSink>,
}

impl Subscriber {
    pub fn new(
        subsystem: Arc<Subsystem>,
        routes: HashMap<String, Decoder>,
        endpoint: impl Into<String>,
        mapping: MappingSink,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            subsystem,
            routes,
            endpoint: endpoint.into(),
            mapping,
            sink,
        }
    }

    fn recv_timeout(&self) -> Duration {
        self.subsystem
            .config()
            .get_i64("i_recv_timeout_ms")
            .filter(|ms| *ms > 0)
            .map_or(DEFAULT_RECV_TIMEOUT, |ms| Duration::from_millis(ms as u64))
    }

    /// Render the mapping line for a Packet. `Ok(None)` for unknown tags.
    pub fn render(&self, packet: &Packet) -> Result<Option<String>, DecodeError> {
        let Some(decoder) = self.routes.get(&packet.tag) else {
            return Ok(None);
        };
        decoder
            .decode(&packet.payload)?
            .render(self.mapping.call())
            .map(Some)
    }

    /// Handle one bus frame.
    pub async fn process(&self, frame: &str) -> Delivery {
        let id = self.subsystem.id();
        let packet = match decode_packet(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping undecodable frame: {}", e);
                self.count("decode_errors");
                return Delivery::Rejected;
            }
        };

        let line = match self.render(&packet) {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("No route for tag {}", packet.tag);
                return Delivery::Unrouted;
            }
            Err(e) => {
                debug!("Dropping {} packet: {}", packet.tag, e);
                self.count("decode_errors");
                return Delivery::Rejected;
            }
        };

        if let Err(e) = self.mapping.send(&line).await {
            warn!("{}: mapping sink unreachable: {}", id, e);
            return Delivery::Rejected;
        }

        self.count(&format!("{}_packets", packet.tag));
        self.sink.dump_data(id, &self.subsystem.status());
        Delivery::Forwarded
    }

    fn count(&self, key: &str) {
        self.subsystem.status_cell().update(|s| {
            s.increment(key, 1);
        });
    }

    /// Receive and process frames while the subsystem is running.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Subscriber {} reading {}", self.subsystem.id(), self.endpoint);
        let mut running = self.subsystem.as_application().map(Application::watch_running);
        let mut connection: Option<WebSocketStream<MaybeTlsStream<TcpStream>>> = None;

        while !*shutdown.borrow() {
            let wait = self.recv_timeout();

            if !self.subsystem.is_running() {
                if let Some(mut ws) = connection.take() {
                    let _ = ws.close(None).await;
                    debug!("Subscriber {} paused", self.subsystem.id());
                }
                tokio::select! {
                    _ = toggled(&mut running, wait) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            if connection.is_none() {
                match tokio_tungstenite::connect_async(self.endpoint.as_str()).await {
                    Ok((ws, _)) => {
                        debug!("Subscriber connected to {}", self.endpoint);
                        connection = Some(ws);
                    }
                    Err(e) => {
                        debug!("Subscriber cannot reach {}: {}", self.endpoint, e);
                        tokio::select! {
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                }
                continue;
            }
            let Some(ws) = connection.as_mut() else {
                continue;
            };

            let received = tokio::select! {
                received = timeout(wait, ws.next()) => received,
                _ = toggled(&mut running, wait) => continue,
                _ = shutdown.changed() => continue,
            };
            match received {
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.process(&text).await;
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    debug!("Proxy closed the subscriber connection");
                    connection = None;
                }
                Ok(Some(Err(e))) => {
                    debug!("Subscriber connection error: {}", e);
                    connection = None;
                }
                Ok(Some(Ok(_))) => {}
                // Timed out: re-check the running flag and shutdown.
                Err(_) => {}
            }
        }

        if let Some(mut ws) = connection {
            let _ = ws.close(None).await;
        }
        info!("Subscriber {} stopped", self.subsystem.id());
    }
}

/// Resolves on the next start or stop, or after `fallback` when the
/// subsystem has no running watch.
async fn toggled(running: &mut Option<watch::Receiver<bool>>, fallback: Duration) {
    if let Some(rx) = running {
        if rx.changed().await.is_ok() {
            return;
        }
    }
    tokio::time::sleep(fallback).await;
}
