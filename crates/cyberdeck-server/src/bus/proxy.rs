//! Stateless relay between forwarders and consumers.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::BusError;

/// Frames buffered per consumer before it starts losing them.
const RELAY_CAPACITY: usize = 4096;

/// Bound inbound and outbound endpoints.
pub struct Proxy {
    inbound: TcpListener,
    outbound: TcpListener,
    relay: broadcast::Sender<String>,
}

/// Observes a running Proxy.
#[derive(Clone)]
pub struct ProxyHandle {
    relay: broadcast::Sender<String>,
}

impl ProxyHandle {
    /// Consumers currently attached to the outbound endpoint.
    pub fn subscriber_count(&self) -> usize {
        self.relay.receiver_count()
    }
}

impl Proxy {
    pub async fn bind(inbound: SocketAddr, outbound: SocketAddr) -> Result<Self, BusError> {
        let inbound = TcpListener::bind(inbound).await?;
        let outbound = TcpListener::bind(outbound).await?;
        let (relay, _) = broadcast::channel(RELAY_CAPACITY);
        Ok(Self {
            inbound,
            outbound,
            relay,
        })
    }

    pub fn inbound_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.inbound.local_addr()?)
    }

    pub fn outbound_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.outbound.local_addr()?)
    }

    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            relay: self.relay.clone(),
        }
    }

    /// Accept connections on both endpoints until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Proxy relaying {:?} -> {:?}",
            self.inbound.local_addr().ok(),
            self.outbound.local_addr().ok()
        );

        loop {
            tokio::select! {
                accepted = self.inbound.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let relay = self.relay.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = relay_from_producer(stream, addr, relay, shutdown).await {
                                debug!("Producer {} error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept producer: {}", e),
                },
                accepted = self.outbound.accept() => match accepted {
                    Ok((stream, addr)) => {
                        // Subscribe before the handshake so the consumer is counted at once.
                        let frames = self.relay.subscribe();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = relay_to_consumer(stream, addr, frames, shutdown).await {
                                debug!("Consumer {} error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept consumer: {}", e),
                },
                _ = shutdown.changed() => {
                    info!("Proxy stopping");
                    break;
                }
            }
        }
    }
}

async fn relay_from_producer(
    stream: TcpStream,
    addr: SocketAddr,
    relay: broadcast::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    debug!("Producer connected from {}", addr);

    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // No consumers attached is not an error.
                    let _ = relay.send(text);
                }
                Some(Ok(Message::Binary(_))) => warn!("Producer {} sent a binary frame, dropped", addr),
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Producer {} disconnected", addr);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}

async fn relay_to_consumer(
    stream: TcpStream,
    addr: SocketAddr,
    mut frames: broadcast::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    debug!("Consumer connected from {}", addr);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => ws_tx.send(Message::Text(text)).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Consumer {} lagged {} frames", addr, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Consumer {} disconnected", addr);
                    break;
                }
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
