//! Whole-registry routes.
//!
//! ### `GET /systems`
//! Subsystem ids in configuration order.
//!
//! ### `GET /config`, `GET /status`, `GET /configstatus`
//! One entry per subsystem, each tagged with its id.
//!
//! ### `POST /config`
//! Writes every configuration record back to the configuration file.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use cyberdeck_protocol::Response;

use super::blocking;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/systems", get(list_systems))
        .route("/config", get(get_config).post(save_config))
        .route("/status", get(get_status))
        .route("/configstatus", get(get_configstatus))
}

/// GET /systems
async fn list_systems(State(state): State<AppState>) -> Json<Response> {
    Json(Response::ok().with("systems", state.registry.list_ids()))
}

/// GET /config
async fn get_config(State(state): State<AppState>) -> Json<Response> {
    Json(match state.registry.get_config(None) {
        Ok(selection) => selection.to_response("config"),
        Err(e) => e.to_response(),
    })
}

/// POST /config
async fn save_config(State(state): State<AppState>) -> Json<Response> {
    let registry = Arc::clone(&state.registry);
    blocking(move || registry.save().map(|_| Response::ok())).await
}

/// GET /status
async fn get_status(State(state): State<AppState>) -> Json<Response> {
    Json(match state.registry.get_status(None) {
        Ok(selection) => selection.to_response("status"),
        Err(e) => e.to_response(),
    })
}

/// GET /configstatus
async fn get_configstatus(State(state): State<AppState>) -> Json<Response> {
    Json(match state.registry.get_configstatus(None) {
        Ok(selection) => selection.to_flat_response(),
        Err(e) => e.to_response(),
    })
}
