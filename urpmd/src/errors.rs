//! Error mapping for the HTTP surface.
//!
//! Handlers bubble [`UrpmError`] out with `?`; the conversion here decides
//! the status code and the flat `{"error": ...}` body the client sees. A
//! missing media is the client's problem, an unreachable upstream is the
//! mirror's, everything else is ours.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use urpm_core::UrpmError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request payload or parameters.
    #[error("{0}")]
    BadRequest(String),

    /// Failure inside the daemon itself (task join, serialization).
    #[error("{0}")]
    Internal(String),

    /// Anything the core reported: store, cache, sync, resolver.
    #[error(transparent)]
    Daemon(#[from] UrpmError),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Daemon(UrpmError::MediaNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Daemon(UrpmError::Network(_)) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Daemon(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
