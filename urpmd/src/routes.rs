//! Route table for the daemon's HTTP surface.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::daemon::Daemon;
use crate::handlers;

/// Build the full application router.
///
/// `/medias` serves the cache tree read-only, so the relative paths a `have`
/// response hands out are directly fetchable by peers.
pub fn create_app(daemon: Arc<Daemon>) -> Router {
    let medias_dir = daemon.config().base_dir.join("medias");

    Router::new()
        .route("/status", get(handlers::status_handler))
        .route("/media", get(handlers::media_list_handler))
        .route("/packages/available", post(handlers::check_available_handler))
        .route("/updates", get(handlers::available_updates_handler))
        .route("/search", get(handlers::search_handler))
        .route("/refresh", post(handlers::refresh_handler))
        .route("/have", post(handlers::have_handler))
        .route(
            "/peers",
            get(handlers::peers_handler).post(handlers::register_peer_handler),
        )
        .nest_service("/medias", ServeDir::new(medias_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(daemon)
}
