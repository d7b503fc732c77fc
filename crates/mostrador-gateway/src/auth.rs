// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator authentication.
//!
//! Every `/v1` route requires `Authorization: Bearer <token>`. The token is
//! resolved to a [`Principal`] by the configured [`IdentityProvider`] and
//! stored in the request extensions. Requests without a valid token are
//! rejected (fail-closed), including when no operators are configured.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use mostrador_config::model::OperatorConfig;
use mostrador_core::{
    AdapterType, HealthStatus, IdentityProvider, MostradorError, PluginAdapter, Principal, Role,
};

use crate::error::ApiError;

/// Lowercase hex SHA-256 of a bearer token, as stored in `operators[].token_sha256`.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Identity provider over the operators listed in configuration.
pub struct OperatorDirectory {
    by_digest: HashMap<String, Principal>,
}

impl OperatorDirectory {
    pub fn from_config(operators: &[OperatorConfig]) -> Self {
        let by_digest = operators
            .iter()
            .map(|op| {
                (
                    op.token_sha256.trim().to_ascii_lowercase(),
                    Principal {
                        id: op.id.clone(),
                        display_name: op.display_name.clone().unwrap_or_else(|| op.id.clone()),
                        role: op.role,
                    },
                )
            })
            .collect();
        Self { by_digest }
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}

impl std::fmt::Debug for OperatorDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorDirectory")
            .field("operators", &self.by_digest.len())
            .finish()
    }
}

#[async_trait]
impl PluginAdapter for OperatorDirectory {
    fn name(&self) -> &str {
        "operator-directory"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Identity
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        if self.by_digest.is_empty() {
            return Ok(HealthStatus::Degraded("no operators configured".into()));
        }
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl IdentityProvider for OperatorDirectory {
    async fn verify(&self, token: &str) -> Result<Principal, MostradorError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(MostradorError::Unauthorized("empty token".into()));
        }
        self.by_digest
            .get(&token_digest(token))
            .cloned()
            .ok_or_else(|| MostradorError::Unauthorized("unknown token".into()))
    }
}

/// The bearer token of an `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware resolving the bearer token into a [`Principal`] extension.
pub async fn auth_middleware(
    State(identity): State<Arc<dyn IdentityProvider>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .map(str::to_owned)
        .ok_or_else(|| MostradorError::Unauthorized("missing bearer token".into()))?;
    let principal = identity.verify(&token).await?;
    tracing::debug!(principal = %principal.id, role = %principal.role, "operator authenticated");
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Reject principals whose role is not in `allowed`.
pub fn require_role(principal: &Principal, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&principal.role) {
        return Ok(());
    }
    Err(ApiError::Forbidden(format!(
        "role {} may not perform this operation",
        principal.role
    )))
}

/// Roles allowed to operate on the service itself.
pub const SUPERVISORS: &[Role] = &[Role::Admin, Role::Supervisor];

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(id: &str, token: &str, role: Role) -> OperatorConfig {
        OperatorConfig {
            id: id.into(),
            display_name: None,
            role,
            token_sha256: token_digest(token),
        }
    }

    #[tokio::test]
    async fn known_token_resolves_to_principal() {
        let directory = OperatorDirectory::from_config(&[
            operator("ana", "ana-token", Role::Agent),
            operator("sofia", "sofia-token", Role::Supervisor),
        ]);
        let ana = directory.verify("ana-token").await.unwrap();
        assert_eq!(ana.id, "ana");
        assert_eq!(ana.display_name, "ana");
        assert_eq!(ana.role, Role::Agent);
        assert!(matches!(
            directory.verify("guess").await,
            Err(MostradorError::Unauthorized(_))
        ));
        assert!(directory.verify("  ").await.is_err());
    }

    #[tokio::test]
    async fn empty_directory_is_degraded_and_rejects_everything() {
        let directory = OperatorDirectory::from_config(&[]);
        assert!(matches!(
            directory.health_check().await.unwrap(),
            HealthStatus::Degraded(_)
        ));
        assert!(directory.verify("anything").await.is_err());
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Bearer tok-1".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("tok-1"));
    }

    #[test]
    fn debug_hides_digests() {
        let directory = OperatorDirectory::from_config(&[operator("ana", "t", Role::Agent)]);
        let debug = format!("{directory:?}");
        assert!(!debug.contains(&token_digest("t")));
    }

    #[test]
    fn agents_are_not_supervisors() {
        let agent = Principal {
            id: "ana".into(),
            display_name: "Ana".into(),
            role: Role::Agent,
        };
        assert!(matches!(
            require_role(&agent, SUPERVISORS),
            Err(ApiError::Forbidden(_))
        ));
    }
}
