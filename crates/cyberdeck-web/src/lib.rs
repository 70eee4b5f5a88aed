//! # cyberdeck-web
//!
//! REST API for the cyberdeck subsystem manager.
//!
//! Every endpoint answers HTTP 200 with a `{"success": bool, ...}` envelope;
//! failures carry a `message`. Lifecycle operations may run shell commands,
//! so they execute on Tokio's blocking pool.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cyberdeck_web::{create_router, ServerState};
//!
//! let app = create_router(ServerState::new(registry));
//!
//! let listener = TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod routes;

pub use routes::create_router;

use std::sync::Arc;

use cyberdeck_server::Registry;

/// Shared state for all route handlers.
pub struct ServerState {
    pub registry: Arc<Registry>,
}

impl ServerState {
    pub fn new(registry: Arc<Registry>) -> AppState {
        Arc::new(Self { registry })
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<ServerState>;
