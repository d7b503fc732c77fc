// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Mostrador control-plane.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Failure category of a Messaging Gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GatewayErrorKind {
    /// Connection reset, refused, DNS failure.
    Network,
    /// The request did not complete in time (including HTTP 408).
    Timeout,
    /// The provider throttled the request (HTTP 429).
    RateLimited,
    /// The provider failed (HTTP 5xx).
    Server,
    /// The request itself was rejected (HTTP 4xx other than 408/429).
    Client,
}

/// Coarse error taxonomy used for retry, circuit-breaker and HTTP decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Dependency trouble: retryable, counted by the circuit breaker.
    Transient,
    /// Malformed request or unknown entity: never retried, never counted.
    Client,
    /// Local overload or a fast-failing breaker.
    Capacity,
    /// Bugs and misconfiguration.
    Internal,
}

/// The primary error type used across all collaborator traits and core operations.
#[derive(Debug, Error)]
pub enum MostradorError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Conversation Store errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Messaging Gateway errors.
    #[error("gateway error ({kind}): {message}")]
    Gateway {
        kind: GatewayErrorKind,
        status: Option<u16>,
        message: String,
    },

    /// Malformed content or a request that violates a state-machine rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// The circuit breaker guarding `dependency` is rejecting calls.
    #[error("circuit open for dependency `{dependency}`")]
    CircuitOpen { dependency: String },

    /// The outbound queue is at capacity and the job could not be admitted.
    #[error("outbound queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Missing or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A referenced conversation or message does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Automated Responder errors.
    #[error("responder error: {message}")]
    Responder {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MostradorError {
    /// Build a gateway error from an HTTP status code returned by the provider.
    pub fn gateway_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            408 => GatewayErrorKind::Timeout,
            429 => GatewayErrorKind::RateLimited,
            500..=599 => GatewayErrorKind::Server,
            _ => GatewayErrorKind::Client,
        };
        Self::Gateway {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Build a gateway error without an HTTP status (transport-level failure).
    pub fn gateway(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self::Gateway {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Wrap any error as a storage error.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage {
            source: Box::new(err),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Map this error onto the taxonomy used by retry and breaker decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Gateway { kind, .. } => match kind {
                GatewayErrorKind::Client => ErrorClass::Client,
                _ => ErrorClass::Transient,
            },
            Self::Timeout { .. } | Self::Storage { .. } | Self::Responder { .. } => {
                ErrorClass::Transient
            }
            Self::Validation(_) | Self::Unauthorized(_) | Self::NotFound { .. } => {
                ErrorClass::Client
            }
            Self::CircuitOpen { .. } | Self::QueueFull { .. } => ErrorClass::Capacity,
            Self::Config(_) | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// HTTP status reported by the provider, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Gateway { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
