//! Periodic config/status broadcast to WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cyberdeck_protocol::codec::encode_snapshot;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bus::BusError;
use crate::registry::Registry;
use crate::subsystem::Subsystem;

pub const DEFAULT_PORT: u16 = 5007;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

const CLIENT_BUFFER: usize = 16;

/// Serves `{"timestamp", "configstatus": [...]}` every `i_period` seconds.
pub struct SnapshotPublisher {
    subsystem: Arc<Subsystem>,
    registry: Arc<Registry>,
    listener: TcpListener,
    frames: broadcast::Sender<String>,
}

impl SnapshotPublisher {
    /// Bind `s_host:i_port` of the publisher device.
    pub async fn bind(subsystem: Arc<Subsystem>, registry: Arc<Registry>) -> Result<Self, BusError> {
        let config = subsystem.config();
        let host = config.get_str("s_host").unwrap_or("127.0.0.1").to_string();
        let port = config
            .get_i64("i_port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);

        let listener = TcpListener::bind((host.as_str(), port)).await?;
        let (frames, _) = broadcast::channel(CLIENT_BUFFER);
        Ok(Self {
            subsystem,
            registry,
            listener,
            frames,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.listener.local_addr()?)
    }

    fn period(&self) -> Duration {
        self.subsystem
            .config()
            .get_i64("i_period")
            .filter(|s| *s > 0)
            .map_or(DEFAULT_PERIOD, |s| Duration::from_secs(s as u64))
    }

    fn publish(&self) {
        let text = match encode_snapshot(&self.registry.snapshot()) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode snapshot: {}", e);
                return;
            }
        };
        // Nobody listening is fine.
        let _ = self.frames.send(text);
        self.subsystem.status_cell().update(|s| {
            s.increment("snapshots", 1);
        });
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Snapshot publisher {} listening on {:?}",
            self.subsystem.id(),
            self.listener.local_addr().ok()
        );
        let mut ticker = tokio::time::interval(self.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish(),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let frames = self.frames.subscribe();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_client(stream, addr, frames, shutdown).await {
                                debug!("Snapshot client {} error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept snapshot client: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Snapshot publisher {} stopped", self.subsystem.id());
    }
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    mut frames: broadcast::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    debug!("Snapshot client connected from {}", addr);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => ws_tx.send(Message::Text(text)).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Snapshot client {} lagged {} snapshots", addr, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
    Ok(())
}
