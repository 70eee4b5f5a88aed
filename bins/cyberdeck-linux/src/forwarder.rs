//! Last stage of a decode pipeline: publishes each stdin line on the bus.

use clap::Parser;
use cyberdeck_server::bus::forwarder::DEFAULT_QUEUE;
use cyberdeck_server::bus::Forwarder;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cyberdeck-forwarder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tag stamped on every packet (the producing subsystem's id)
    #[arg(short = 't', long = "tag")]
    tag: String,

    /// Proxy inbound endpoint
    #[arg(short = 'e', long = "endpoint", default_value = "ws://127.0.0.1:5005")]
    endpoint: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to nobody; keep logs on stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let forwarder = Forwarder::spawn(cli.tag, cli.endpoint, DEFAULT_QUEUE);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim_end();
                    if !line.is_empty() {
                        forwarder.publish(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read input: {}", e);
                    break;
                }
            },
            _ = terminate.recv() => break,
        }
    }

    tracing::debug!("Forwarder {} closing", forwarder.tag());
    forwarder.close().await;
    Ok(())
}
