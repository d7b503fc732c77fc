// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use mostrador_core::MostradorError;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Taxonomy class: `transient`, `client`, `capacity` or `internal`.
    pub class: String,
}

/// Errors returned by handlers, rendered as JSON.
#[derive(Debug)]
pub enum ApiError {
    Domain(MostradorError),
    /// Authenticated, but the principal's role is not allowed here.
    Forbidden(String),
}

impl From<MostradorError> for ApiError {
    fn from(err: MostradorError) -> Self {
        Self::Domain(err)
    }
}

pub fn status_for(err: &MostradorError) -> StatusCode {
    match err {
        MostradorError::Validation(_) => StatusCode::BAD_REQUEST,
        MostradorError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        MostradorError::NotFound { .. } => StatusCode::NOT_FOUND,
        MostradorError::CircuitOpen { .. } | MostradorError::QueueFull { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::Domain(err) => err,
            Self::Forbidden(message) => {
                let body = ErrorResponse {
                    error: message,
                    class: "client".to_string(),
                };
                return (StatusCode::FORBIDDEN, Json(body)).into_response();
            }
        };
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::warn!(error = %err, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
        }
        let body = ErrorResponse {
            error: err.to_string(),
            class: err.class().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
