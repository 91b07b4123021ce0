//! HTTP handlers over the daemon's query surface.
//!
//! Every payload is JSON; errors surface through [`AppError`] as a JSON
//! error body. Handlers stay thin: deserialize, delegate to the daemon,
//! shape the response.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::daemon::Daemon;
use crate::errors::{AppError, AppResult};

pub async fn status_handler(State(daemon): State<Arc<Daemon>>) -> Json<Value> {
    Json(daemon.status().await)
}

pub async fn media_list_handler(State(daemon): State<Arc<Daemon>>) -> AppResult<Json<Value>> {
    let media = daemon.media_list().await?;
    Ok(Json(json!({ "media": media })))
}

#[derive(Debug, Deserialize)]
pub struct PackagesRequest {
    pub packages: Vec<String>,
}

pub async fn check_available_handler(
    State(daemon): State<Arc<Daemon>>,
    Json(request): Json<PackagesRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(daemon.check_available(&request.packages).await?))
}

pub async fn available_updates_handler(
    State(daemon): State<Arc<Daemon>>,
) -> AppResult<Json<Value>> {
    Ok(Json(daemon.available_updates().await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<i64>,
}

pub async fn search_handler(
    State(daemon): State<Arc<Daemon>>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Value>> {
    if params.q.is_empty() {
        return Err(AppError::bad_request("empty search pattern"));
    }
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let hits = daemon.search(&params.q, limit).await?;
    Ok(Json(json!({ "count": hits.len(), "packages": hits })))
}

#[derive(Debug, Deserialize, Default)]
pub struct RefreshRequest {
    pub media: Option<String>,
    #[serde(default)]
    pub force: bool,
}

pub async fn refresh_handler(
    State(daemon): State<Arc<Daemon>>,
    request: Option<Json<RefreshRequest>>,
) -> AppResult<Json<Value>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    info!(
        "refresh requested (media={:?}, force={})",
        request.media, request.force
    );
    Ok(Json(
        daemon
            .refresh_metadata(request.media.as_deref(), request.force)
            .await?,
    ))
}

pub async fn have_handler(
    State(daemon): State<Arc<Daemon>>,
    Json(request): Json<PackagesRequest>,
) -> AppResult<Json<Value>> {
    let report = daemon.have(request.packages).await?;
    Ok(Json(serde_json::to_value(report).map_err(|e| AppError::internal(e.to_string()))?))
}

pub async fn peers_handler(State(daemon): State<Arc<Daemon>>) -> AppResult<Json<Value>> {
    let peers = daemon.peers().await?;
    Ok(Json(json!({ "peers": peers })))
}

#[derive(Debug, Deserialize)]
pub struct RegisterPeerRequest {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub media: Vec<String>,
}

pub async fn register_peer_handler(
    State(daemon): State<Arc<Daemon>>,
    Json(request): Json<RegisterPeerRequest>,
) -> AppResult<Json<Value>> {
    if request.host.is_empty() || request.port == 0 {
        return Err(AppError::bad_request("peer host and port are required"));
    }
    let peer = daemon
        .register_peer(&request.host, request.port, request.media)
        .await?;
    Ok(Json(json!({ "registered": peer })))
}
