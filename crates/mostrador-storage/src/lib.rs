// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite Conversation Store.
//!
//! WAL-mode SQLite with embedded migrations. All statements run on the single
//! background thread owned by `tokio-rusqlite`, which serializes conflicting
//! writes to the same row.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use adapter::SqliteStore;
pub use database::Database;
