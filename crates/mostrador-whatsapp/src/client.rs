// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the WhatsApp Cloud (Graph) API.
//!
//! Retrying is not done here: the delivery queue and the circuit breaker own
//! that decision, so every failure is returned once, classified.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use mostrador_config::model::WhatsAppConfig;
use mostrador_core::{
    AdapterType, GatewayErrorKind, HealthStatus, MessageContent, MessagingGateway,
    MostradorError, PluginAdapter, SendReceipt,
};

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentId>,
}

#[derive(Debug, Deserialize)]
struct SentId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GraphErrorResponse {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default, rename = "type")]
    type_: Option<String>,
}

/// Messaging gateway backed by the WhatsApp Cloud API.
#[derive(Debug, Clone)]
pub struct WhatsAppGateway {
    client: reqwest::Client,
    messages_url: String,
    phone_number_url: String,
}

impl WhatsAppGateway {
    /// Build the gateway from the `[whatsapp]` section.
    ///
    /// Fails with a configuration error when the phone number id or the
    /// access token is missing.
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, MostradorError> {
        let phone_number_id = config
            .phone_number_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MostradorError::Config("whatsapp.phone_number_id is not set".into()))?;
        let access_token = config
            .access_token
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MostradorError::Config("whatsapp.access_token is not set".into()))?;

        let mut bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|e| MostradorError::Config(format!("invalid access token header value: {e}")))?;
        bearer.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MostradorError::Config(format!("failed to build HTTP client: {e}")))?;

        let base = config.api_base_url.trim_end_matches('/');
        let phone_number_url = format!("{base}/{}/{phone_number_id}", config.api_version);
        Ok(Self {
            client,
            messages_url: format!("{phone_number_url}/messages"),
            phone_number_url,
        })
    }
}

/// Graph API request body for `content` addressed to `to`.
fn request_body(to: &str, content: &MessageContent) -> Result<Value, MostradorError> {
    let (kind, object) = match content {
        MessageContent::Text { body } => ("text", json!({ "body": body, "preview_url": false })),
        MessageContent::Image {
            media_id, caption, ..
        } => ("image", json!({ "id": media_id, "caption": caption })),
        MessageContent::Video {
            media_id, caption, ..
        } => ("video", json!({ "id": media_id, "caption": caption })),
        MessageContent::Audio { media_id, .. } => ("audio", json!({ "id": media_id })),
        MessageContent::Document {
            media_id,
            filename,
            caption,
            ..
        } => (
            "document",
            json!({ "id": media_id, "filename": filename, "caption": caption }),
        ),
        MessageContent::Location {
            latitude,
            longitude,
            name,
            address,
        } => (
            "location",
            json!({
                "latitude": latitude,
                "longitude": longitude,
                "name": name,
                "address": address,
            }),
        ),
        MessageContent::Interactive { .. } => {
            return Err(MostradorError::Validation(
                "interactive replies cannot be sent as outbound messages".into(),
            ));
        }
    };

    let mut body = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": kind,
    });
    body[kind] = strip_nulls(object);
    Ok(body)
}

fn strip_nulls(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    value
}

fn transport_error(err: reqwest::Error) -> MostradorError {
    let kind = if err.is_timeout() {
        GatewayErrorKind::Timeout
    } else {
        GatewayErrorKind::Network
    };
    MostradorError::gateway(kind, format!("WhatsApp request failed: {err}"))
}

fn status_error(status: StatusCode, body: &str) -> MostradorError {
    let message = match serde_json::from_str::<GraphErrorResponse>(body) {
        Ok(parsed) => format!(
            "WhatsApp API error {} ({}): {}",
            parsed.error.code.map_or_else(|| "-".to_string(), |c| c.to_string()),
            parsed.error.type_.as_deref().unwrap_or("unknown"),
            parsed.error.message
        ),
        Err(_) => format!("WhatsApp API returned {status}: {body}"),
    };
    MostradorError::gateway_status(status.as_u16(), message)
}

#[async_trait]
impl PluginAdapter for WhatsAppGateway {
    fn name(&self) -> &str {
        "whatsapp-cloud"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Gateway
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        match self.client.get(&self.phone_number_url).send().await {
            Ok(response) if response.status().is_success() => Ok(HealthStatus::Healthy),
            Ok(response) => Ok(HealthStatus::Degraded(format!(
                "phone number lookup returned {}",
                response.status()
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl MessagingGateway for WhatsAppGateway {
    async fn send(&self, to: &str, content: &MessageContent) -> Result<SendReceipt, MostradorError> {
        let body = request_body(to, content)?;
        let response = self
            .client
            .post(&self.messages_url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        debug!(status = %status, kind = %content.kind(), "graph api send response");

        if !status.is_success() {
            let err = status_error(status, &text);
            warn!(status = status.as_u16(), error = %err, "whatsapp send rejected");
            return Err(err);
        }

        let parsed: SendResponse = serde_json::from_str(&text).map_err(|e| {
            MostradorError::gateway(
                GatewayErrorKind::Server,
                format!("unparseable WhatsApp send response: {e}"),
            )
        })?;
        let provider_message_id = parsed
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| {
                MostradorError::gateway(
                    GatewayErrorKind::Server,
                    "WhatsApp send response carried no message id",
                )
            })?;
        Ok(SendReceipt {
            provider_message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mostrador_core::ErrorClass;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(base_url: &str) -> WhatsAppGateway {
        WhatsAppGateway::from_config(&WhatsAppConfig {
            phone_number_id: Some("1098765".into()),
            access_token: Some("EAAG-test".into()),
            api_base_url: base_url.to_string(),
            api_version: "v21.0".into(),
            request_timeout_secs: 2,
            ..WhatsAppConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn missing_credentials_are_config_errors() {
        let err = WhatsAppGateway::from_config(&WhatsAppConfig::default()).unwrap_err();
        assert!(matches!(err, MostradorError::Config(_)));
    }

    #[test]
    fn media_body_omits_absent_fields() {
        let body = request_body(
            "+5215550001",
            &MessageContent::Image {
                media_id: "m-1".into(),
                caption: None,
                mime_type: None,
            },
        )
        .unwrap();
        assert_eq!(body["type"], "image");
        assert_eq!(body["image"], json!({ "id": "m-1" }));
    }

    #[test]
    fn interactive_content_is_not_sendable() {
        let content = MessageContent::Interactive {
            reply_id: "yes".into(),
            title: "Sí".into(),
        };
        let err = request_body("+1", &content).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Client);
    }

    #[tokio::test]
    async fn text_send_returns_provider_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/1098765/messages"))
            .and(header("authorization", "Bearer EAAG-test"))
            .and(body_partial_json(json!({
                "messaging_product": "whatsapp",
                "to": "+5215550001",
                "type": "text",
                "text": { "body": "Hola" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "contacts": [{ "input": "+5215550001", "wa_id": "5215550001" }],
                "messages": [{ "id": "wamid.HBgM" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = gateway(&server.uri())
            .send("+5215550001", &MessageContent::text("Hola"))
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id, "wamid.HBgM");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .send("+1", &MessageContent::text("x"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.http_status(), Some(503));
    }

    #[tokio::test]
    async fn rate_limit_is_transient_and_keeps_graph_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "message": "(#130429) Rate limit hit",
                    "type": "OAuthException",
                    "code": 130429
                }
            })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .send("+1", &MessageContent::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MostradorError::Gateway {
                kind: GatewayErrorKind::RateLimited,
                ..
            }
        ));
        assert!(err.to_string().contains("130429"), "got: {err}");
    }

    #[tokio::test]
    async fn bad_request_is_a_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Recipient phone number not in allowed list",
                    "type": "OAuthException",
                    "code": 131030
                }
            })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .send("+1", &MessageContent::text("x"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Client);
    }

    #[tokio::test]
    async fn success_without_id_is_a_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .send("+1", &MessageContent::text("x"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_api_is_a_network_error() {
        // Nothing listens on port 9 of localhost.
        let err = gateway("http://127.0.0.1:9")
            .send("+1", &MessageContent::text("x"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.http_status(), None);
    }

    #[tokio::test]
    async fn health_check_reports_lookup_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v21.0/1098765"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let status = gateway(&server.uri()).health_check().await.unwrap();
        assert!(matches!(status, HealthStatus::Degraded(_)));
    }
}
