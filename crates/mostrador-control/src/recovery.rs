// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failed-message recovery.
//!
//! Periodically resends messages left in `failed` status, in bounded
//! batches with a pause between them. Each attempt is counted in the store
//! before the gateway is called, so a crash mid-attempt never yields an
//! uncounted extra send. A message whose `retry_count` reached the cap is
//! left alone until an operator retries it by hand.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mostrador_bus::{Hub, HubEvent};
use mostrador_core::{
    ConversationStore, Message, MessageId, MessageStatus, MessagingGateway, MostradorError,
};
use mostrador_resilience::{CircuitBreaker, CircuitState};

#[derive(Debug, Clone, PartialEq)]
pub struct RecoverySettings {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub max_retries: u32,
    /// Failed messages older than this are deleted by the cleanup pass.
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(120),
            batch_size: 10,
            batch_pause: Duration::from_secs(1),
            max_retries: 3,
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `retry_count` already reached the cap.
    AtCap,
    /// The message is no longer `failed`.
    NotFailed,
    CircuitOpen,
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RetryResult {
    Sent {
        provider_message_id: String,
        retry_count: u32,
    },
    Failed {
        reason: String,
        retry_count: u32,
        /// The cap is reached; no further automatic attempts.
        permanent: bool,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Failed messages found in the store.
    pub found: usize,
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    /// The sweep stopped early because the gateway circuit opened.
    pub halted_by_circuit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryStats {
    pub failed_total: usize,
    pub at_cap: usize,
    pub retryable: usize,
    pub average_retries: f64,
    pub max_retries: u32,
}

pub struct FailedMessageRecovery {
    settings: RecoverySettings,
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn MessagingGateway>,
    breaker: Arc<CircuitBreaker>,
    hub: Arc<Hub>,
    sweeping: Mutex<()>,
}

impl FailedMessageRecovery {
    pub fn new(
        settings: RecoverySettings,
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn MessagingGateway>,
        breaker: Arc<CircuitBreaker>,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            settings,
            store,
            gateway,
            breaker,
            hub,
            sweeping: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    /// One sweep over every failed message below the cap.
    ///
    /// A sweep already in progress makes this call return an empty report.
    pub async fn process_failed_messages(&self) -> Result<SweepReport, MostradorError> {
        let Ok(_guard) = self.sweeping.try_lock() else {
            debug!("recovery sweep already running");
            return Ok(SweepReport::default());
        };

        let failed = self.store.list_failed().await?;
        mostrador_prometheus::set_failed_messages(failed.len());
        let mut report = SweepReport {
            found: failed.len(),
            ..SweepReport::default()
        };

        let candidates: Vec<Message> = failed
            .into_iter()
            .filter(|m| m.retry_count < self.settings.max_retries)
            .collect();
        report.skipped = report.found - candidates.len();
        if candidates.is_empty() {
            return Ok(report);
        }

        let mut offset = 0;
        while offset < candidates.len() {
            if offset > 0 {
                tokio::time::sleep(self.settings.batch_pause).await;
            }
            if !self.breaker.is_call_permitted() {
                warn!(
                    event = "circuit_open",
                    remaining = candidates.len() - offset,
                    "gateway circuit open, stopping recovery sweep"
                );
                report.halted_by_circuit = true;
                break;
            }

            // A recovering circuit admits one probe; send a single message.
            let size = if self.breaker.state() == CircuitState::Closed {
                self.settings.batch_size.max(1)
            } else {
                1
            };
            let end = (offset + size).min(candidates.len());
            let batch = &candidates[offset..end];
            offset = end;

            let results = join_all(batch.iter().map(|m| self.retry_message(m, false))).await;
            for (message, result) in batch.iter().zip(results) {
                report.attempted += 1;
                match result {
                    Ok(RetryResult::Sent { .. }) => report.sent += 1,
                    Ok(RetryResult::Failed { .. }) => report.failed += 1,
                    Ok(RetryResult::Skipped {
                        reason: SkipReason::CircuitOpen,
                    }) => {
                        report.skipped += 1;
                        report.halted_by_circuit = true;
                    }
                    Ok(RetryResult::Skipped { .. }) => report.skipped += 1,
                    Err(e) => {
                        report.errors += 1;
                        error!(message_id = %message.id, error = %e, "recovery attempt errored");
                    }
                }
            }
            if report.halted_by_circuit {
                warn!(
                    event = "circuit_open",
                    remaining = candidates.len() - offset,
                    "gateway circuit opened mid-sweep, stopping recovery sweep"
                );
                break;
            }
        }

        if report.attempted > 0 {
            info!(
                found = report.found,
                attempted = report.attempted,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                halted_by_circuit = report.halted_by_circuit,
                "recovery sweep finished"
            );
        }
        Ok(report)
    }

    /// Resend one failed message.
    ///
    /// `manual` bypasses the cap check (the counter itself never exceeds the
    /// cap).
    pub async fn retry_message(
        &self,
        message: &Message,
        manual: bool,
    ) -> Result<RetryResult, MostradorError> {
        if message.status != MessageStatus::Failed {
            return Ok(RetryResult::Skipped {
                reason: SkipReason::NotFailed,
            });
        }
        if !manual && message.retry_count >= self.settings.max_retries {
            return Ok(RetryResult::Skipped {
                reason: SkipReason::AtCap,
            });
        }
        let conversation = self
            .store
            .get_conversation(&message.conversation_id)
            .await?
            .ok_or_else(|| MostradorError::not_found("conversation", &message.conversation_id))?;

        // Only an admitted attempt is counted against the cap.
        let Ok(permit) = self.breaker.try_acquire() else {
            mostrador_prometheus::record_recovery_attempt("circuit_open");
            debug!(message_id = %message.id, "circuit open, recovery attempt skipped");
            return Ok(RetryResult::Skipped {
                reason: SkipReason::CircuitOpen,
            });
        };

        let counted = self
            .store
            .record_retry_attempt(message.id, Utc::now(), self.settings.max_retries)
            .await?;

        let result = permit
            .call(|| self.gateway.send(&conversation.counterpart, &message.content))
            .await;
        crate::publish_breaker_state(&self.breaker);

        match result {
            Ok(receipt) => {
                self.store
                    .mark_sent(message.id, &receipt.provider_message_id)
                    .await?;
                mostrador_prometheus::record_recovery_attempt("sent");
                info!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    retry_count = counted.retry_count,
                    manual,
                    "failed message resent"
                );
                self.hub.emit_to_topic(
                    &message.conversation_id,
                    &HubEvent::MessageStatusUpdate {
                        conversation_id: message.conversation_id.clone(),
                        message_id: message.id,
                        status: MessageStatus::Sent,
                        provider_message_id: Some(receipt.provider_message_id.clone()),
                        reason: None,
                    },
                );
                Ok(RetryResult::Sent {
                    provider_message_id: receipt.provider_message_id,
                    retry_count: counted.retry_count,
                })
            }
            Err(err) => {
                let reason = err.to_string();
                self.store
                    .update_message_status(message.id, MessageStatus::Failed, Some(reason.clone()))
                    .await?;
                let permanent = counted.retry_count >= self.settings.max_retries;
                mostrador_prometheus::record_recovery_attempt(if permanent {
                    "exhausted"
                } else {
                    "failed"
                });
                if permanent {
                    warn!(
                        message_id = %message.id,
                        conversation_id = %message.conversation_id,
                        retry_count = counted.retry_count,
                        error = %err,
                        "message permanently failed, operator follow-up required"
                    );
                } else {
                    debug!(message_id = %message.id, retry_count = counted.retry_count, error = %err, "recovery attempt failed");
                }
                self.hub.emit_global(&HubEvent::MessageFailed {
                    conversation_id: message.conversation_id.clone(),
                    message_id: message.id,
                    reason: reason.clone(),
                    retry_count: counted.retry_count,
                    permanent,
                });
                Ok(RetryResult::Failed {
                    reason,
                    retry_count: counted.retry_count,
                    permanent,
                })
            }
        }
    }

    /// Operator-triggered retry, allowed even at the cap.
    pub async fn retry_message_by_id(&self, id: MessageId) -> Result<RetryResult, MostradorError> {
        let message = self
            .store
            .get_message(id)
            .await?
            .ok_or_else(|| MostradorError::not_found("message", id))?;
        self.retry_message(&message, true).await
    }

    /// Delete failed messages older than the retention horizon.
    pub async fn cleanup(&self) -> Result<u64, MostradorError> {
        let cutoff = Utc::now() - to_delta(self.settings.retention)?;
        let deleted = self.store.delete_failed_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "deleted expired failed messages");
        }
        Ok(deleted)
    }

    /// Mark `pending` messages older than `older_than` as failed so the next
    /// sweep resends them. Used at startup for sends a crash interrupted.
    pub async fn recover_stale_pending(&self, older_than: Duration) -> Result<u64, MostradorError> {
        let cutoff = Utc::now() - to_delta(older_than)?;
        let count = self
            .store
            .fail_stale_pending(cutoff, "interrupted before delivery")
            .await?;
        if count > 0 {
            warn!(count, "marked stale pending messages as failed");
        }
        Ok(count)
    }

    pub async fn retry_stats(&self) -> Result<RetryStats, MostradorError> {
        let failed = self.store.list_failed().await?;
        let max = self.settings.max_retries;
        let at_cap = failed.iter().filter(|m| m.retry_count >= max).count();
        let total_retries: u64 = failed.iter().map(|m| u64::from(m.retry_count)).sum();
        let average_retries = if failed.is_empty() {
            0.0
        } else {
            total_retries as f64 / failed.len() as f64
        };
        Ok(RetryStats {
            failed_total: failed.len(),
            at_cap,
            retryable: failed.len() - at_cap,
            average_retries,
            max_retries: max,
        })
    }

    /// A page of failed messages, oldest first.
    pub async fn list_failed(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, MostradorError> {
        let failed = self.store.list_failed().await?;
        Ok(failed.into_iter().skip(offset).take(limit).collect())
    }

    /// Start the periodic sweep and cleanup.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        if !self.settings.enabled {
            info!("failed-message recovery disabled");
            return Vec::new();
        }

        let sweeper = {
            let recovery = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(recovery.settings.interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = recovery.process_failed_messages().await {
                                error!(error = %e, "recovery sweep failed");
                            }
                        }
                    }
                }
                info!("recovery sweep task stopped");
            })
        };

        let cleaner = {
            let recovery = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(recovery.settings.cleanup_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = recovery.cleanup().await {
                                error!(error = %e, "failed-message cleanup failed");
                            }
                        }
                    }
                }
                info!("recovery cleanup task stopped");
            })
        };

        vec![sweeper, cleaner]
    }
}

fn to_delta(duration: Duration) -> Result<TimeDelta, MostradorError> {
    TimeDelta::from_std(duration)
        .map_err(|e| MostradorError::Internal(format!("duration out of range: {e}")))
}
