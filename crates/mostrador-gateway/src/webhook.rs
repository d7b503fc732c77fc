// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp webhook endpoints.
//!
//! `GET /webhook` answers the subscription handshake. `POST /webhook`
//! verifies the payload signature (when an app secret is configured), parses
//! the payload and hands the events to the inbound pipeline on a spawned
//! task. Parsed payloads are always acknowledged with 200 so the provider
//! does not redeliver them; processing errors are logged, not returned.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use mostrador_core::MostradorError;
use mostrador_whatsapp::{SubscriptionQuery, parse_webhook, verify_signature};

use crate::error::ApiError;
use crate::server::GatewayState;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// GET /webhook
pub async fn verify_subscription(
    State(state): State<GatewayState>,
    Query(query): Query<SubscriptionQuery>,
) -> Response {
    match mostrador_whatsapp::verify_subscription(&query, state.webhook.verify_token.as_deref()) {
        Ok(challenge) => {
            tracing::info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "webhook verification rejected");
            (StatusCode::FORBIDDEN, "verification failed").into_response()
        }
    }
}

/// POST /webhook
pub async fn receive(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(secret) = state.webhook.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = verify_signature(secret, &body, signature) {
            mostrador_prometheus::record_webhook("bad_signature");
            return Err(e.into());
        }
    }

    let events = match parse_webhook(&body) {
        Ok(events) => events,
        Err(e) => {
            mostrador_prometheus::record_webhook("malformed");
            return Err(ApiError::Domain(match e {
                MostradorError::Validation(_) => e,
                other => MostradorError::Validation(other.to_string()),
            }));
        }
    };

    if events.is_empty() {
        mostrador_prometheus::record_webhook("empty");
        tracing::debug!("webhook carried no supported events");
    } else {
        mostrador_prometheus::record_webhook("accepted");
        tracing::debug!(events = events.len(), "webhook accepted");
        state.ctx.ingest.spawn_batch(events);
    }
    Ok((StatusCode::OK, "EVENT_RECEIVED").into_response())
}
