// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits consumed by the control-plane.

pub mod adapter;
pub mod gateway;
pub mod identity;
pub mod responder;
pub mod store;

pub use adapter::PluginAdapter;
pub use gateway::MessagingGateway;
pub use identity::IdentityProvider;
pub use responder::AutomatedResponder;
pub use store::ConversationStore;
