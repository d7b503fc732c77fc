// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the operator REST API.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use mostrador_bus::{HubStats, PresenceEntry};
use mostrador_control::{DeliveryJob, OutboundRequest, QueueStats, RetryResult, RetryStats, SendOutcome};
use mostrador_core::{
    AiMode, ControlMode, Conversation, ConversationId, HealthStatus, Message, MessageContent,
    MessageId, ModeChange, MostradorError, Principal, Priority, SenderType,
};
use mostrador_resilience::{BreakerHealth, CircuitSnapshot, OverallHealth};

use crate::auth::{SUPERVISORS, require_role};
use crate::error::ApiError;
use crate::server::GatewayState;

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;

fn page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
}

/// Request body for `POST /v1/conversations/{id}/messages`.
///
/// Either `content` (any message type) or `text` is required.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub text: Option<String>,
    /// Idempotency key; generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl SendMessageRequest {
    fn into_content(self) -> Result<(MessageContent, Option<String>, Priority), MostradorError> {
        let content = match (self.content, self.text) {
            (Some(content), _) => content,
            (None, Some(text)) => MessageContent::text(text),
            (None, None) => {
                return Err(MostradorError::Validation(
                    "either `content` or `text` is required".into(),
                ));
            }
        };
        Ok((content, self.client_id, self.priority.unwrap_or_default()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: ControlMode,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AiModeRequest {
    pub ai_mode: AiMode,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PublicHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct BreakersReport {
    pub health: BreakerHealth,
    pub circuits: Vec<CircuitSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct DedupReport {
    pub entries: usize,
    pub ttl_secs: u64,
}

/// Response body for `GET /v1/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: OverallHealth,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub store: HealthStatus,
    pub gateway: HealthStatus,
    pub breakers: BreakersReport,
    pub queue: QueueStats,
    pub hub: HubStats,
    pub dedup: DedupReport,
}

#[derive(Debug, Serialize)]
pub struct FailedPage {
    pub messages: Vec<Message>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

fn degraded(result: Result<HealthStatus, MostradorError>) -> HealthStatus {
    result.unwrap_or_else(|e| HealthStatus::Unhealthy(e.to_string()))
}

/// GET /health
pub async fn get_public_health(State(state): State<GatewayState>) -> Json<PublicHealthResponse> {
    Json(PublicHealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics
pub async fn get_public_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// GET /v1/health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let ctx = &state.ctx;
    let store = degraded(ctx.store.health_check().await);
    let gateway = degraded(ctx.gateway.health_check().await);
    let breakers = ctx.breakers.health();

    let status = match (breakers.overall, &store) {
        (_, HealthStatus::Unhealthy(_)) => OverallHealth::Critical,
        (OverallHealth::Healthy, HealthStatus::Degraded(_)) => OverallHealth::Degraded,
        (overall, _) => overall,
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        store,
        gateway,
        breakers: BreakersReport {
            health: breakers,
            circuits: ctx.breakers.snapshots(),
        },
        queue: ctx.queue.stats(),
        hub: ctx.hub.stats(),
        dedup: DedupReport {
            entries: ctx.ledger.len(),
            ttl_secs: ctx.ledger.ttl().as_secs(),
        },
    })
}

/// GET /v1/conversations/{id}
pub async fn get_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let id = ConversationId::from(id);
    let conversation = state
        .ctx
        .store
        .get_conversation(&id)
        .await?
        .ok_or_else(|| MostradorError::not_found("conversation", &id))?;
    Ok(Json(conversation))
}

/// GET /v1/conversations/{id}/messages?limit
///
/// The latest messages, oldest first.
pub async fn list_messages(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let id = ConversationId::from(id);
    if state.ctx.store.get_conversation(&id).await?.is_none() {
        return Err(MostradorError::not_found("conversation", &id).into());
    }
    let messages = state
        .ctx
        .store
        .recent_messages(&id, page_size(page.limit))
        .await?;
    Ok(Json(messages))
}

/// POST /v1/conversations/{id}/messages
///
/// 202 when queued, 200 when the client id was already used.
pub async fn send_message(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendOutcome>), ApiError> {
    let (content, client_id, priority) = body.into_content()?;
    let request = OutboundRequest {
        conversation_id: ConversationId::from(id),
        content,
        client_id: client_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        priority,
        sender_type: SenderType::Agent,
        sender_id: Some(principal.id.clone()),
    };
    let outcome = state.ctx.outbound.send(request).await?;
    let status = if outcome.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(outcome)))
}

/// PUT /v1/conversations/{id}/mode
pub async fn set_mode(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<ModeRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .ctx
        .control
        .set_mode(
            &ConversationId::from(id),
            body.mode,
            Some(&principal.id),
            body.reason.as_deref(),
        )
        .await?;
    Ok(Json(conversation))
}

/// PUT /v1/conversations/{id}/ai-mode
pub async fn set_ai_mode(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<AiModeRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .ctx
        .control
        .set_ai_mode(
            &ConversationId::from(id),
            body.ai_mode,
            Some(&principal.id),
            body.reason.as_deref(),
        )
        .await?;
    Ok(Json(conversation))
}

/// GET /v1/conversations/{id}/mode-history
pub async fn mode_history(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ModeChange>>, ApiError> {
    let history = state
        .ctx
        .control
        .mode_history(&ConversationId::from(id))
        .await?;
    Ok(Json(history))
}

/// GET /v1/messages/failed?limit&offset
pub async fn list_failed(
    State(state): State<GatewayState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<FailedPage>, ApiError> {
    let limit = page_size(page.limit);
    let offset = page.offset.unwrap_or(0);
    let messages = state.ctx.recovery.list_failed(limit, offset).await?;
    Ok(Json(FailedPage {
        messages,
        limit,
        offset,
    }))
}

/// POST /v1/messages/{id}/retry
pub async fn retry_message(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<RetryResult>, ApiError> {
    tracing::info!(message_id = id, principal = %principal.id, "manual retry requested");
    let result = state.ctx.recovery.retry_message_by_id(MessageId(id)).await?;
    Ok(Json(result))
}

/// GET /v1/recovery/stats
pub async fn recovery_stats(
    State(state): State<GatewayState>,
) -> Result<Json<RetryStats>, ApiError> {
    Ok(Json(state.ctx.recovery.retry_stats().await?))
}

/// GET /v1/queue
pub async fn queue_stats(State(state): State<GatewayState>) -> Json<QueueStats> {
    Json(state.ctx.queue.stats())
}

/// DELETE /v1/queue
///
/// Drops every queued job; their messages become `failed` and recovery owns them.
pub async fn clear_queue(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ClearedResponse>, ApiError> {
    require_role(&principal, SUPERVISORS)?;
    let cleared = state.ctx.queue.clear();
    tracing::warn!(cleared, principal = %principal.id, "delivery queue cleared");
    Ok(Json(ClearedResponse { cleared }))
}

/// GET /v1/queue/jobs/{id}
pub async fn get_job(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryJob>, ApiError> {
    let job = state
        .ctx
        .queue
        .get_job(&id)
        .ok_or_else(|| MostradorError::not_found("job", &id))?;
    Ok(Json(job))
}

/// DELETE /v1/queue/jobs/{id}
pub async fn remove_job(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_role(&principal, SUPERVISORS)?;
    state
        .ctx
        .queue
        .remove_job(&id)
        .ok_or_else(|| MostradorError::not_found("job", &id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/presence
pub async fn presence(State(state): State<GatewayState>) -> Json<Vec<PresenceEntry>> {
    Json(state.ctx.hub.connected_principals())
}

/// POST /v1/breakers/{name}/reset
pub async fn reset_breaker(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<CircuitSnapshot>, ApiError> {
    require_role(&principal, SUPERVISORS)?;
    if !state.ctx.breakers.reset(&name) {
        return Err(MostradorError::not_found("circuit breaker", &name).into());
    }
    tracing::info!(breaker = %name, principal = %principal.id, "circuit breaker reset");
    let snapshot = state
        .ctx
        .breakers
        .get(&name)
        .map(|breaker| breaker.snapshot())
        .ok_or_else(|| MostradorError::not_found("circuit breaker", &name))?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_accepts_text_shorthand() {
        let req: SendMessageRequest = serde_json::from_str(r#"{"text":"hola"}"#).unwrap();
        let (content, client_id, priority) = req.into_content().unwrap();
        assert_eq!(content, MessageContent::text("hola"));
        assert_eq!(client_id, None);
        assert_eq!(priority, Priority::Normal);
    }

    #[test]
    fn send_request_prefers_structured_content() {
        let req: SendMessageRequest = serde_json::from_str(
            r#"{"content":{"type":"image","media_id":"m-1"},"text":"ignored","priority":"high"}"#,
        )
        .unwrap();
        let (content, _, priority) = req.into_content().unwrap();
        assert!(matches!(content, MessageContent::Image { .. }));
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn send_request_without_content_is_invalid() {
        let req: SendMessageRequest = serde_json::from_str(r#"{"client_id":"k"}"#).unwrap();
        assert!(matches!(
            req.into_content(),
            Err(MostradorError::Validation(_))
        ));
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_size(None), DEFAULT_PAGE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(10_000)), MAX_PAGE);
    }
}
