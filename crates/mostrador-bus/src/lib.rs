// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime fan-out hub.
//!
//! Authenticated operator connections subscribe to per-conversation topics
//! and an implicit global topic. Publishers never block: each connection has
//! a bounded buffer and a full buffer drops the event for that connection.

pub mod events;
pub mod hub;

pub use events::{ClientCommand, HubEvent, NoticeLevel, Topic};
pub use hub::{ConnectionHandle, ConnectionId, Hub, HubConfig, HubStats, PresenceEntry};
