// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core types and collaborator traits for the Mostrador message delivery
//! and conversation control-plane.
//!
//! Every other crate in the workspace depends on this one. It defines the
//! error taxonomy, the conversation and message data model, and the traits
//! implemented by the external collaborators (store, messaging gateway,
//! automated responder, identity provider).

pub mod error;
pub mod inbound;
pub mod traits;
pub mod types;

pub use error::{ErrorClass, GatewayErrorKind, MostradorError};
pub use inbound::{InboundEvent, InboundMessage, StatusReceipt};
pub use traits::{
    AutomatedResponder, ConversationStore, IdentityProvider, MessagingGateway, PluginAdapter,
};
pub use types::*;
