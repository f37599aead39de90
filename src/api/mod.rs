//! Client-facing HTTP surface.

pub mod coordinator;
pub mod handlers;

use crate::api::coordinator::Coordinator;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// Shared handler state.
pub struct AppState {
    pub coordinator: Coordinator,
}

/// Build the client router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/v1/{key}",
            axum::routing::put(handlers::put_key)
                .get(handlers::get_key)
                .delete(handlers::delete_key),
        )
        .with_state(state)
}
