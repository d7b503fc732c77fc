// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware and shared state.

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

use mostrador_config::model::GatewayConfig;
use mostrador_control::ControlContext;
use mostrador_core::{IdentityProvider, MostradorError};

use crate::auth::auth_middleware;
use crate::{handlers, webhook, ws};

/// State for the unauthenticated health and metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Prometheus render function; `None` disables `/metrics`.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

/// Webhook credentials.
#[derive(Clone, Default)]
pub struct WebhookSettings {
    /// Token echoed back during subscription verification.
    pub verify_token: Option<String>,
    /// When set, every POST must carry a valid `X-Hub-Signature-256`.
    pub app_secret: Option<String>,
}

impl std::fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("verify_token", &self.verify_token.as_ref().map(|_| "[redacted]"))
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub ctx: Arc<ControlContext>,
    pub identity: Arc<dyn IdentityProvider>,
    pub webhook: WebhookSettings,
    pub health: HealthState,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Build the application router.
///
/// - `GET /health`, `GET /metrics`: public
/// - `GET|POST /webhook`: WhatsApp webhook, authenticated by verify token / signature
/// - `/v1/...`: operator API behind bearer auth
/// - `GET /ws`: realtime socket, token checked during the handshake
pub fn build_router(state: GatewayState, cors_origins: &[String]) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_public_health))
        .route("/metrics", get(handlers::get_public_metrics))
        .route(
            "/webhook",
            get(webhook::verify_subscription).post(webhook::receive),
        )
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/health", get(handlers::get_health))
        .route("/v1/conversations/{id}", get(handlers::get_conversation))
        .route(
            "/v1/conversations/{id}/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route("/v1/conversations/{id}/mode", put(handlers::set_mode))
        .route("/v1/conversations/{id}/ai-mode", put(handlers::set_ai_mode))
        .route(
            "/v1/conversations/{id}/mode-history",
            get(handlers::mode_history),
        )
        .route("/v1/messages/failed", get(handlers::list_failed))
        .route("/v1/messages/{id}/retry", post(handlers::retry_message))
        .route("/v1/recovery/stats", get(handlers::recovery_stats))
        .route(
            "/v1/queue",
            get(handlers::queue_stats).delete(handlers::clear_queue),
        )
        .route(
            "/v1/queue/jobs/{id}",
            get(handlers::get_job).delete(handlers::remove_job),
        )
        .route("/v1/presence", get(handlers::presence))
        .route("/v1/breakers/{name}/reset", post(handlers::reset_breaker))
        .route_layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state.identity),
            auth_middleware,
        ))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(cors_layer(cors_origins))
}

/// Bind and serve until `cancel` fires.
pub async fn serve(
    config: &GatewayConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), MostradorError> {
    let app = build_router(state, &config.cors_origins);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MostradorError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| MostradorError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}

