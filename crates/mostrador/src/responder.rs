// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Automated responders wired by `mostrador serve`.
//!
//! [`HttpResponder`] posts the recent transcript to an external endpoint and
//! expects `{"text": "..."}` back, or `204 No Content` to decline.
//! [`DisabledResponder`] declines every conversation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mostrador_config::model::ResponderConfig;
use mostrador_core::{
    AdapterType, AutomatedResponder, Conversation, HealthStatus, Message, MostradorError,
    PluginAdapter, SenderType,
};

#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    conversation_id: &'a str,
    counterpart: &'a str,
    contact_name: Option<&'a str>,
    transcript: Vec<TranscriptLine<'a>>,
}

#[derive(Debug, Serialize)]
struct TranscriptLine<'a> {
    sender_type: SenderType,
    sender_id: Option<&'a str>,
    text: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ReplyResponse {
    #[serde(default)]
    text: Option<String>,
}

fn responder_error(message: impl Into<String>) -> MostradorError {
    MostradorError::Responder {
        message: message.into(),
        source: None,
    }
}

pub struct HttpResponder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpResponder {
    pub fn from_config(config: &ResponderConfig) -> Result<Self, MostradorError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| MostradorError::Config("responder.endpoint is not set".into()))?;

        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut bearer = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| MostradorError::Config(format!("invalid responder api key: {e}")))?;
            bearer.set_sensitive(true);
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MostradorError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl PluginAdapter for HttpResponder {
    fn name(&self) -> &str {
        "http-responder"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Responder
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl AutomatedResponder for HttpResponder {
    async fn respond(
        &self,
        conversation: &Conversation,
        transcript: &[Message],
    ) -> Result<Option<String>, MostradorError> {
        let request = ReplyRequest {
            conversation_id: conversation.id.as_str(),
            counterpart: &conversation.counterpart,
            contact_name: conversation.contact_name.as_deref(),
            transcript: transcript
                .iter()
                .map(|m| TranscriptLine {
                    sender_type: m.sender_type,
                    sender_id: m.sender_id.as_deref(),
                    text: m.content.preview(),
                    created_at: m.created_at,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| MostradorError::Responder {
                message: "responder request failed".into(),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        debug!(status = %status, conversation_id = %conversation.id, "responder answered");
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(responder_error(format!("responder returned {status}")));
        }

        let reply: ReplyResponse = response
            .json()
            .await
            .map_err(|e| responder_error(format!("unparseable responder reply: {e}")))?;
        Ok(reply
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }
}

/// Responder used when `[responder] enabled = false`.
pub struct DisabledResponder;

#[async_trait]
impl PluginAdapter for DisabledResponder {
    fn name(&self) -> &str {
        "disabled-responder"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Responder
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        Ok(HealthStatus::Degraded("automated responder disabled".into()))
    }
}

#[async_trait]
impl AutomatedResponder for DisabledResponder {
    async fn respond(
        &self,
        _conversation: &Conversation,
        _transcript: &[Message],
    ) -> Result<Option<String>, MostradorError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mostrador_core::{MessageContent, MessageId, MessageStatus};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn responder(server: &MockServer) -> HttpResponder {
        HttpResponder::from_config(&ResponderConfig {
            enabled: true,
            endpoint: Some(format!("{}/reply", server.uri())),
            api_key: Some("rk-test".into()),
            timeout_secs: 2,
            ..ResponderConfig::default()
        })
        .unwrap()
    }

    fn conversation() -> Conversation {
        Conversation::new("5215550001", Some("Lucía".into()), Utc::now())
    }

    fn inbound(conversation: &Conversation, body: &str) -> Message {
        let now = Utc::now();
        Message {
            id: MessageId(1),
            conversation_id: conversation.id.clone(),
            client_id: None,
            provider_message_id: Some("wamid.in.1".into()),
            sender_type: SenderType::User,
            sender_id: None,
            content: MessageContent::text(body),
            status: MessageStatus::Delivered,
            failure_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            last_retry_at: None,
        }
    }

    #[tokio::test]
    async fn reply_text_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reply"))
            .and(header("authorization", "Bearer rk-test"))
            .and(body_partial_json(json!({
                "counterpart": "5215550001",
                "contact_name": "Lucía",
                "transcript": [{ "sender_type": "user", "text": "hola" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": " ¿En qué te ayudo? " })))
            .expect(1)
            .mount(&server)
            .await;

        let conv = conversation();
        let reply = responder(&server)
            .respond(&conv, &[inbound(&conv, "hola")])
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("¿En qué te ayudo?"));
    }

    #[tokio::test]
    async fn no_content_declines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let conv = conversation();
        let reply = responder(&server)
            .respond(&conv, &[inbound(&conv, "gracias")])
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let conv = conversation();
        let err = responder(&server)
            .respond(&conv, &[inbound(&conv, "hola")])
            .await
            .unwrap_err();
        assert!(matches!(err, MostradorError::Responder { .. }));
        assert_eq!(err.class(), mostrador_core::ErrorClass::Transient);
    }

    #[test]
    fn endpoint_is_required() {
        let err = HttpResponder::from_config(&ResponderConfig::default()).err().unwrap();
        assert!(matches!(err, MostradorError::Config(_)));
    }

    #[tokio::test]
    async fn disabled_responder_always_declines() {
        let conv = conversation();
        let reply = DisabledResponder
            .respond(&conv, &[inbound(&conv, "hola")])
            .await
            .unwrap();
        assert!(reply.is_none());
    }
}
