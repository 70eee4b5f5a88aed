//! Per-subsystem routes, nested under `/systems`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, put},
    Router,
};
use cyberdeck_protocol::Response;
use cyberdeck_server::Operation;

use super::blocking;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id/config", get(get_config).put(set_config))
        .route("/:id/status", get(get_status))
        .route("/:id/configstatus", get(get_configstatus))
        .route("/:id/start_process", put(start_process))
        .route("/:id/stop_process", put(stop_process))
        .route("/:id/power", put(set_power))
        .route("/:id/power/toggle", put(toggle_power))
        .route("/:id/frequency", get(get_frequency).put(set_frequency))
        .route("/:id/mode", get(get_mode).put(set_mode))
        .route("/:id/level", get(get_level))
}

type Args = HashMap<String, String>;

/// Parse `name` with `args` and dispatch it to subsystem `id`.
async fn run(state: AppState, id: String, name: &'static str, args: Args) -> Json<Response> {
    let registry = Arc::clone(&state.registry);
    blocking(move || {
        let operation = Operation::parse(name, &args)?;
        registry
            .dispatch(&id, operation)
            .map(|outcome| outcome.to_response())
    })
    .await
}

/// GET /systems/:id/config
async fn get_config(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "get_config", Args::new()).await
}

/// PUT /systems/:id/config?key=..&value=..
async fn set_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(args): Query<Args>,
) -> Json<Response> {
    run(state, id, "set_config", args).await
}

/// GET /systems/:id/status
async fn get_status(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "get_status", Args::new()).await
}

/// GET /systems/:id/configstatus
async fn get_configstatus(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "get_configstatus", Args::new()).await
}

/// PUT /systems/:id/start_process
async fn start_process(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "start_process", Args::new()).await
}

/// PUT /systems/:id/stop_process
async fn stop_process(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "stop_process", Args::new()).await
}

/// PUT /systems/:id/power?power=..
async fn set_power(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(args): Query<Args>,
) -> Json<Response> {
    run(state, id, "set_power", args).await
}

/// PUT /systems/:id/power/toggle
async fn toggle_power(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "toggle_power", Args::new()).await
}

/// GET /systems/:id/frequency
async fn get_frequency(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "get_frequency", Args::new()).await
}

/// PUT /systems/:id/frequency?frequency=..
async fn set_frequency(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(args): Query<Args>,
) -> Json<Response> {
    run(state, id, "set_frequency", args).await
}

/// GET /systems/:id/mode
async fn get_mode(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "get_mode", Args::new()).await
}

/// PUT /systems/:id/mode?mode=..
async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(args): Query<Args>,
) -> Json<Response> {
    run(state, id, "set_mode", args).await
}

/// GET /systems/:id/level
async fn get_level(State(state): State<AppState>, Path(id): Path<String>) -> Json<Response> {
    run(state, id, "get_level", Args::new()).await
}
