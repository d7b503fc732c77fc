// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection registry, topic membership, presence and liveness.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mostrador_core::{ConversationId, MostradorError, Principal, Role};

use crate::events::{ClientCommand, HubEvent, Topic};

/// Opaque per-connection identifier.
pub type ConnectionId = String;

/// Hub timers and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Interval between server pings on each socket.
    pub ping_interval: Duration,
    /// Round-trip latency above which a connection is logged.
    pub latency_warn_threshold: Duration,
    /// Connections without client activity for this long are closed.
    pub idle_timeout: Duration,
    /// How often the idle sweep runs.
    pub liveness_check_interval: Duration,
    /// Frames buffered per connection before events are dropped.
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            latency_warn_threshold: Duration::from_millis(2000),
            idle_timeout: Duration::from_secs(300),
            liveness_check_interval: Duration::from_secs(60),
            outbound_buffer: 256,
        }
    }
}

struct Connection {
    principal: Principal,
    tx: mpsc::Sender<String>,
    connected_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    latency_ms: AtomicU64,
    topics: Mutex<HashSet<ConversationId>>,
    closer: CancellationToken,
}

impl Connection {
    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }
}

/// What a socket task receives when it registers.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub principal: Principal,
    /// Serialized frames to write to the socket.
    pub rx: mpsc::Receiver<String>,
    /// Cancelled when the hub wants the socket closed (idle, kicked).
    pub closed: CancellationToken,
}

/// One operator's presence.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceEntry {
    pub principal_id: String,
    pub display_name: String,
    pub role: Role,
    pub connections: usize,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub principals: usize,
    pub topics: usize,
    pub total_connections: u64,
    pub events_published: u64,
    pub frames_dropped: u64,
    pub idle_disconnects: u64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    events_published: AtomicU64,
    frames_dropped: AtomicU64,
    idle_disconnects: AtomicU64,
}

/// Authenticated publish/subscribe hub.
///
/// State is process-local and rebuilt from scratch on restart.
pub struct Hub {
    config: HubConfig,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    topics: DashMap<ConversationId, HashSet<ConnectionId>>,
    principals: DashMap<String, HashSet<ConnectionId>>,
    counters: Counters,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            topics: DashMap::new(),
            principals: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a verified principal's connection and announce it.
    pub fn register(&self, principal: Principal) -> ConnectionHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let closed = CancellationToken::new();

        let connection = Arc::new(Connection {
            principal: principal.clone(),
            tx,
            connected_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            latency_ms: AtomicU64::new(0),
            topics: Mutex::new(HashSet::new()),
            closer: closed.clone(),
        });
        self.connections.insert(id.clone(), connection);
        self.principals
            .entry(principal.id.clone())
            .or_default()
            .insert(id.clone());
        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);

        info!(
            connection = %id,
            principal = %principal.id,
            role = %principal.role,
            "operator connected"
        );
        self.broadcast_except(
            &HubEvent::UserConnected {
                principal_id: principal.id.clone(),
                display_name: principal.display_name.clone(),
            },
            Some(&id),
        );

        ConnectionHandle {
            id,
            principal,
            rx,
            closed,
        }
    }

    /// Remove a connection, drop its topic memberships and announce the
    /// departure to everyone else. Unknown ids are ignored.
    pub fn unregister(&self, id: &ConnectionId) {
        let Some((_, connection)) = self.connections.remove(id) else {
            return;
        };

        let joined: Vec<ConversationId> = connection
            .topics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .collect();
        for conversation_id in joined {
            self.remove_member(&conversation_id, id);
        }

        let principal_id = connection.principal.id.clone();
        self.principals.remove_if_mut(&principal_id, |_, ids| {
            ids.remove(id);
            ids.is_empty()
        });

        info!(connection = %id, principal = %principal_id, "operator disconnected");
        self.broadcast_except(
            &HubEvent::UserDisconnected {
                principal_id,
                display_name: connection.principal.display_name.clone(),
            },
            Some(id),
        );
    }

    fn remove_member(&self, conversation_id: &ConversationId, id: &ConnectionId) {
        self.topics.remove_if_mut(conversation_id, |_, members| {
            members.remove(id);
            members.is_empty()
        });
    }

    fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    fn deliver(&self, id: &ConnectionId, connection: &Connection, frame: String) -> bool {
        match connection.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(connection = %id, principal = %connection.principal.id, "slow consumer, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn deliver_to(&self, ids: impl IntoIterator<Item = ConnectionId>, event: &HubEvent) -> usize {
        self.counters.events_published.fetch_add(1, Ordering::Relaxed);
        let frame = event.to_frame(Utc::now());
        let mut delivered = 0;
        for id in ids {
            if let Some(connection) = self.connection(&id) {
                if self.deliver(&id, &connection, frame.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn broadcast_except(&self, event: &HubEvent, except: Option<&ConnectionId>) -> usize {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|c| c.key().clone())
            .filter(|id| Some(id) != except)
            .collect();
        self.deliver_to(ids, event)
    }

    /// Subscribe a connection to a conversation topic.
    pub fn join_topic(
        &self,
        id: &ConnectionId,
        conversation_id: &ConversationId,
    ) -> Result<(), MostradorError> {
        let connection = self
            .connection(id)
            .ok_or_else(|| MostradorError::Unauthorized("connection is not registered".into()))?;
        if !self.subscribe(id, &connection, conversation_id) {
            return Err(MostradorError::Unauthorized("connection is not registered".into()));
        }
        debug!(connection = %id, conversation_id = %conversation_id, "joined conversation");
        self.send_to(
            id,
            &HubEvent::JoinedConversation {
                conversation_id: conversation_id.clone(),
            },
        );
        Ok(())
    }

    /// Record membership on both sides. An `unregister` racing with this
    /// call either drains the new entry or is observed by the final check.
    fn subscribe(
        &self,
        id: &ConnectionId,
        connection: &Connection,
        conversation_id: &ConversationId,
    ) -> bool {
        connection
            .topics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(conversation_id.clone());
        self.topics
            .entry(conversation_id.clone())
            .or_default()
            .insert(id.clone());
        if self.connections.contains_key(id) {
            return true;
        }
        connection
            .topics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(conversation_id);
        self.remove_member(conversation_id, id);
        false
    }

    pub fn leave_topic(&self, id: &ConnectionId, conversation_id: &ConversationId) {
        if let Some(connection) = self.connection(id) {
            connection
                .topics
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(conversation_id);
        }
        self.remove_member(conversation_id, id);
        self.send_to(
            id,
            &HubEvent::LeftConversation {
                conversation_id: conversation_id.clone(),
            },
        );
    }

    fn topic_member_ids(&self, conversation_id: &ConversationId) -> Vec<ConnectionId> {
        self.topics
            .get(conversation_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Publish to members of a conversation topic; returns deliveries.
    pub fn emit_to_topic(&self, conversation_id: &ConversationId, event: &HubEvent) -> usize {
        let ids = self.topic_member_ids(conversation_id);
        self.deliver_to(ids, event)
    }

    /// Publish to every connection.
    pub fn emit_global(&self, event: &HubEvent) -> usize {
        self.broadcast_except(event, None)
    }

    /// Publish to a conversation topic first, then to every other
    /// connection. Each connection receives the event once.
    pub fn emit_to_topic_and_global(
        &self,
        conversation_id: &ConversationId,
        event: &HubEvent,
    ) -> usize {
        let members = self.topic_member_ids(conversation_id);
        let others: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|c| c.key().clone())
            .filter(|id| !members.contains(id))
            .collect();
        self.deliver_to(members.into_iter().chain(others), event)
    }

    /// Publish to every connection of one principal.
    pub fn emit_to_principal(&self, principal_id: &str, event: &HubEvent) -> usize {
        let ids: Vec<ConnectionId> = self
            .principals
            .get(principal_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        self.deliver_to(ids, event)
    }

    pub fn publish(&self, topic: &Topic, event: &HubEvent) -> usize {
        match topic {
            Topic::Global => self.emit_global(event),
            Topic::Conversation(id) => self.emit_to_topic(id, event),
        }
    }

    /// Send one event to one connection.
    pub fn send_to(&self, id: &ConnectionId, event: &HubEvent) -> bool {
        match self.connection(id) {
            Some(connection) => self.deliver(id, &connection, event.to_frame(Utc::now())),
            None => false,
        }
    }

    /// Record client activity on a connection.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(connection) = self.connection(id) {
            *connection
                .last_activity
                .lock()
                .unwrap_or_else(|p| p.into_inner()) = Instant::now();
        }
    }

    /// Record a measured round trip and log slow connections.
    pub fn record_latency(&self, id: &ConnectionId, latency: Duration) {
        let Some(connection) = self.connection(id) else {
            return;
        };
        let millis = latency.as_millis() as u64;
        connection.latency_ms.store(millis, Ordering::Relaxed);
        if latency > self.config.latency_warn_threshold {
            warn!(
                connection = %id,
                principal = %connection.principal.id,
                latency_ms = millis,
                "high connection latency"
            );
        }
    }

    /// Apply a client command received on connection `id`.
    pub fn handle_command(&self, id: &ConnectionId, command: ClientCommand) {
        self.touch(id);
        match command {
            ClientCommand::JoinConversation { conversation_id } => {
                if let Err(e) = self.join_topic(id, &conversation_id) {
                    debug!(connection = %id, error = %e, "join rejected");
                }
            }
            ClientCommand::LeaveConversation { conversation_id } => {
                self.leave_topic(id, &conversation_id);
            }
            ClientCommand::Typing {
                conversation_id,
                is_typing,
            } => {
                let Some(connection) = self.connection(id) else {
                    return;
                };
                let member = connection
                    .topics
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .contains(&conversation_id);
                if !member {
                    self.send_to(
                        id,
                        &HubEvent::Error {
                            message: format!("join conversation {conversation_id} first"),
                        },
                    );
                    return;
                }
                let event = HubEvent::UserTyping {
                    conversation_id: conversation_id.clone(),
                    principal_id: connection.principal.id.clone(),
                    display_name: connection.principal.display_name.clone(),
                    is_typing,
                };
                let others: Vec<ConnectionId> = self
                    .topic_member_ids(&conversation_id)
                    .into_iter()
                    .filter(|member| member != id)
                    .collect();
                self.deliver_to(others, &event);
            }
            ClientCommand::Ping { timestamp } => {
                let now = Utc::now().timestamp_millis();
                let latency_ms = (now - timestamp).max(0);
                self.record_latency(id, Duration::from_millis(latency_ms as u64));
                self.send_to(
                    id,
                    &HubEvent::Pong {
                        client_timestamp: timestamp,
                        server_timestamp: now,
                        latency_ms,
                    },
                );
            }
        }
    }

    /// Close connections idle longer than the inactivity window.
    pub fn sweep_idle(&self) -> usize {
        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.value().idle_for() >= self.config.idle_timeout)
            .map(|c| c.key().clone())
            .collect();
        for id in &idle {
            if let Some(connection) = self.connection(id) {
                info!(connection = %id, principal = %connection.principal.id, "closing idle connection");
                connection.closer.cancel();
            }
            self.unregister(id);
        }
        self.counters
            .idle_disconnects
            .fetch_add(idle.len() as u64, Ordering::Relaxed);
        idle.len()
    }

    /// Close every connection of a principal. Returns how many were closed.
    pub fn disconnect_principal(&self, principal_id: &str) -> usize {
        let ids: Vec<ConnectionId> = self
            .principals
            .get(principal_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            if let Some(connection) = self.connection(id) {
                connection.closer.cancel();
            }
            self.unregister(id);
        }
        ids.len()
    }

    /// Run the idle sweep every `liveness_check_interval` until `cancel` fires.
    pub fn spawn_liveness(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.config.liveness_check_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = hub.sweep_idle();
                        if closed > 0 {
                            info!(closed, "idle connections closed");
                        }
                    }
                }
            }
            info!("hub liveness task stopped");
        })
    }

    /// Who is online, one entry per principal.
    pub fn connected_principals(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self
            .principals
            .iter()
            .filter_map(|entry| {
                let ids = entry.value();
                let first = ids
                    .iter()
                    .filter_map(|id| self.connection(id))
                    .min_by_key(|c| c.connected_at)?;
                Some(PresenceEntry {
                    principal_id: entry.key().clone(),
                    display_name: first.principal.display_name.clone(),
                    role: first.principal.role,
                    connections: ids.len(),
                    connected_at: first.connected_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.principal_id.cmp(&b.principal_id));
        entries
    }

    pub fn is_connected(&self, principal_id: &str) -> bool {
        self.principals.contains_key(principal_id)
    }

    pub fn topic_size(&self, conversation_id: &ConversationId) -> usize {
        self.topics.get(conversation_id).map_or(0, |m| m.len())
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            principals: self.principals.len(),
            topics: self.topics.len(),
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            events_published: self.counters.events_published.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            idle_disconnects: self.counters.idle_disconnects.load(Ordering::Relaxed),
        }
    }
}
