// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity provider with a fixed token table.

use std::collections::HashMap;

use async_trait::async_trait;

use mostrador_core::{
    AdapterType, HealthStatus, IdentityProvider, MostradorError, PluginAdapter, Principal, Role,
};

#[derive(Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, Principal>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as the principal `id`.
    pub fn with_principal(mut self, token: &str, id: &str, role: Role) -> Self {
        self.tokens.insert(
            token.to_string(),
            Principal {
                id: id.to_string(),
                display_name: id.to_string(),
                role,
            },
        );
        self
    }
}

#[async_trait]
impl PluginAdapter for StaticIdentity {
    fn name(&self) -> &str {
        "static-identity"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Identity
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn verify(&self, token: &str) -> Result<Principal, MostradorError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| MostradorError::Unauthorized("unknown token".into()))
    }
}
