// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP and WebSocket surface of Mostrador.
//!
//! - `/webhook`: WhatsApp subscription handshake and event delivery
//! - `/v1/...`: operator REST API (bearer tokens resolved by an
//!   [`mostrador_core::IdentityProvider`])
//! - `/ws`: realtime operator socket backed by the fan-out hub
//! - `/health`, `/metrics`: public probes

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod webhook;
pub mod ws;

pub use auth::{OperatorDirectory, token_digest};
pub use error::ApiError;
pub use server::{GatewayState, HealthState, WebhookSettings, build_router, serve};
