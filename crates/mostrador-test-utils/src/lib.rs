// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Mostrador integration tests.
//!
//! Mock collaborators and a harness for fast, deterministic tests without
//! a database, the WhatsApp API or a responder endpoint.
//!
//! # Components
//!
//! - [`MemoryStore`] - in-memory conversation store
//! - [`ScriptedGateway`] - messaging gateway following a scripted list of outcomes
//! - [`ScriptedResponder`] - automated responder with queued replies
//! - [`StaticIdentity`] - identity provider over a fixed token table
//! - [`TestHarness`] - a wired `ControlContext` over the mocks

pub mod harness;
pub mod memory_store;
pub mod mock_gateway;
pub mod mock_identity;
pub mod mock_responder;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use memory_store::MemoryStore;
pub use mock_gateway::{GatewayStep, ScriptedGateway, SentMessage};
pub use mock_identity::StaticIdentity;
pub use mock_responder::{ResponderCall, ResponderStep, ScriptedResponder};
