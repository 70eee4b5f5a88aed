//! HTTP route handlers.
//!
//! - `/systems`, `/config`, `/status`, `/configstatus` - whole registry
//! - `/systems/:id/...` - one subsystem
//! - `/ping` - liveness

pub mod registry;
pub mod systems;

use axum::{response::Json, routing::put, Router};
use cyberdeck_protocol::Response;
use cyberdeck_server::RegistryError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::AppState;

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(registry::routes())
        .nest("/systems", systems::routes())
        .route("/ping", put(ping))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// PUT /ping
async fn ping() -> Json<Response> {
    Json(Response::ok())
}

/// Run a blocking registry call on the blocking pool.
pub(crate) async fn blocking<F>(f: F) -> Json<Response>
where
    F: FnOnce() -> Result<Response, RegistryError> + Send + 'static,
{
    let response = match tokio::task::spawn_blocking(f).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => e.to_response(),
        Err(e) => {
            error!("Request handler failed: {}", e);
            Response::error("Internal error")
        }
    };
    Json(response)
}
