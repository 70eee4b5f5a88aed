use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cyberdeck_server::{FileConfigStorage, Registry, Runtime, Services, TracingSink};
use cyberdeck_web::{create_router, ServerState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cyberdeck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "cyberdeck.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,cyberdeck_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!("Cyberdeck starting with {}", cli.config.display());

    let storage = Arc::new(FileConfigStorage::new(&cli.config));
    let registry = Arc::new(Registry::load(storage, Services::system())?);
    let settings = registry.settings().clone();

    let runtime = Runtime::start(Arc::clone(&registry), Arc::new(TracingSink)).await?;

    let app = create_router(ServerState::new(Arc::clone(&registry)));
    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port)).await?;
    tracing::info!("REST API listening on {}", listener.local_addr()?);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        result = async { axum::serve(listener, app).await } => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    runtime.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
