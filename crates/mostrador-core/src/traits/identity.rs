// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity Provider trait for operator authentication.

use async_trait::async_trait;

use crate::error::MostradorError;
use crate::traits::adapter::PluginAdapter;
use crate::types::Principal;

/// Resolves a presented token to a verified operator principal.
#[async_trait]
pub trait IdentityProvider: PluginAdapter {
    /// Returns [`MostradorError::Unauthorized`] for unknown or malformed tokens.
    async fn verify(&self, token: &str) -> Result<Principal, MostradorError>;
}
