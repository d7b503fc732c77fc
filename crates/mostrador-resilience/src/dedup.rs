// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Short-lived ledger of recently seen idempotency keys.
//!
//! Expiry is checked lazily on lookup and swept periodically by
//! [`DedupLedger::spawn_eviction`]. A duplicate arriving after the TTL is
//! treated as new.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default retention for ledger entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// TTL set of idempotency keys. Values are expiry instants.
#[derive(Debug)]
pub struct DedupLedger {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl DedupLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Key for a provider-assigned inbound message id.
    pub fn inbound_key(provider_message_id: &str) -> String {
        format!("inbound:{provider_message_id}")
    }

    /// Key for a caller-assigned outbound idempotency key.
    pub fn outbound_key(conversation_id: &str, client_id: &str) -> String {
        format!("outbound:{conversation_id}:{client_id}")
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `key` was remembered and has not yet expired.
    pub fn seen(&self, key: &str) -> bool {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => return false,
            Some(expires_at) => *expires_at <= now,
        };
        if expired {
            self.entries.remove_if(key, |_, expires_at| *expires_at <= now);
            return false;
        }
        true
    }

    /// Remember `key` for `ttl`, or the ledger default.
    pub fn remember(&self, key: &str, ttl: Option<Duration>) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.ttl);
        self.entries.insert(key.to_string(), expires_at);
    }

    /// Atomically record `key`. Returns `true` when the key was not already
    /// live, i.e. the caller is the first to process it.
    pub fn check_and_remember(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(now + self.ttl);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + self.ttl);
                true
            }
        }
    }

    /// Drop `key` so a later delivery of the same event is accepted.
    pub fn forget(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove all expired entries; returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep expired entries every `interval` until `cancel` fires.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        name: &'static str,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = ledger.evict_expired();
                        if evicted > 0 {
                            debug!(ledger = name, evicted, remaining = ledger.len(), "evicted expired dedup keys");
                        }
                    }
                }
            }
            info!(ledger = name, "dedup eviction task stopped");
        })
    }
}
