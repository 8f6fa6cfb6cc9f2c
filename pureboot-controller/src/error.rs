//! HTTP-edge error mapping (spec.md §6 "Exit/error codes", §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pureboot_core::PureBootError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the HTTP boot dispatch surface.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Propagated from `pureboot-core`'s domain operations.
    #[error(transparent)]
    Core(#[from] PureBootError),

    /// Propagated from the PXE dispatch plane.
    #[error(transparent)]
    Pxe(#[from] pureboot_pxe::PxeError),

    /// Startup-time configuration failure.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Core(PureBootError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Core(PureBootError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(PureBootError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Core(PureBootError::RetryLimitExceeded(_) | PureBootError::InvalidTransition { .. }) => StatusCode::BAD_REQUEST,
            Self::Core(PureBootError::Io(_) | PureBootError::WorkflowFormat(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Pxe(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::warn!(error = %self, status = %status, "request failed");
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}
