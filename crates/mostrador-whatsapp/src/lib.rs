// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp Cloud API integration.
//!
//! - [`WhatsAppGateway`] sends messages through the Graph API and classifies
//!   failures into [`mostrador_core::GatewayErrorKind`]s.
//! - [`parse_webhook`] turns a webhook payload into provider-neutral
//!   [`mostrador_core::InboundEvent`]s.
//! - [`signature`] verifies `X-Hub-Signature-256` headers and the
//!   subscription handshake.

pub mod client;
pub mod payload;
pub mod signature;

pub use client::WhatsAppGateway;
pub use payload::{WebhookPayload, parse_webhook};
pub use signature::{SubscriptionQuery, sign_payload, verify_signature, verify_subscription};
