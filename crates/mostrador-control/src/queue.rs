// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound delivery queue.
//!
//! Three FIFO tiers (high, normal, low) drained by at most `workers`
//! concurrent tasks. Workers are spawned on enqueue and exit when the queue
//! is empty. Every send goes through the WhatsApp circuit breaker; a failed
//! attempt the retry policy allows is handed to a timer queue and
//! re-enqueued at the head of its tier once the backoff elapses, so workers
//! never sleep. Jobs that exhaust their attempts, are evicted on overflow,
//! or expire mark their message `failed` for the recovery sweep.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

use mostrador_bus::{Hub, HubEvent};
use mostrador_core::{
    ConversationId, ConversationStore, Message, MessageContent, MessageId, MessageStatus,
    MessagingGateway, MostradorError, Priority, SendReceipt,
};
use mostrador_resilience::{CircuitBreaker, RetryPolicy};

pub type JobId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub max_size: usize,
    pub workers: usize,
    /// Jobs waiting longer than this are dropped by the sweep.
    pub max_job_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            workers: 5,
            max_job_age: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// One pending send of a persisted message.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryJob {
    pub id: JobId,
    pub correlation_id: String,
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    /// Counterpart the message is addressed to.
    pub to: String,
    pub content: MessageContent,
    pub priority: Priority,
    /// Failed attempts so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    enqueued_at: Instant,
}

impl DeliveryJob {
    pub fn new(message: &Message, to: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: message
                .client_id
                .clone()
                .unwrap_or_else(|| format!("msg-{}", message.id)),
            message_id: message.id,
            conversation_id: message.conversation_id.clone(),
            to: to.into(),
            content: message.content.clone(),
            priority,
            attempts: 0,
            created_at: Utc::now(),
            enqueued_at: Instant::now(),
        }
    }

    /// Time since the job was first enqueued.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub active_workers: usize,
    pub scheduled_retries: usize,
    pub oldest_job_age_ms: Option<u64>,
    pub sent: u64,
    pub failed: u64,
    pub retried: u64,
    pub dropped: u64,
    pub expired: u64,
}

fn tier_index(priority: Priority) -> usize {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tiers: [VecDeque<DeliveryJob>; 3],
    active_workers: usize,
    /// Spawned workers that have not yet taken their first job.
    starting: usize,
}

impl QueueState {
    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn push(&mut self, job: DeliveryJob, front: bool) {
        let tier = &mut self.tiers[tier_index(job.priority)];
        if front {
            tier.push_front(job);
        } else {
            tier.push_back(job);
        }
    }

    fn pop(&mut self) -> Option<DeliveryJob> {
        self.tiers.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Make room for a job of `priority`: remove the oldest job of the
    /// lowest non-empty tier that does not outrank it.
    fn evict_for(&mut self, priority: Priority) -> Option<DeliveryJob> {
        for tier_priority in [Priority::Low, Priority::Normal, Priority::High] {
            if tier_priority.rank() > priority.rank() {
                break;
            }
            let tier = &mut self.tiers[tier_index(tier_priority)];
            let oldest = tier
                .iter()
                .enumerate()
                .min_by_key(|(_, job)| job.enqueued_at)
                .map(|(i, _)| i);
            if let Some(index) = oldest {
                return tier.remove(index);
            }
        }
        None
    }

    fn take_expired(&mut self, max_age: Duration) -> Vec<DeliveryJob> {
        let mut expired = Vec::new();
        for tier in &mut self.tiers {
            let (old, keep): (VecDeque<_>, VecDeque<_>) =
                tier.drain(..).partition(|job| job.age() > max_age);
            *tier = keep;
            expired.extend(old);
        }
        expired
    }

    fn find(&self, id: &str) -> Option<&DeliveryJob> {
        self.tiers.iter().flat_map(|t| t.iter()).find(|j| j.id == id)
    }

    fn remove(&mut self, id: &str) -> Option<DeliveryJob> {
        for tier in &mut self.tiers {
            if let Some(index) = tier.iter().position(|j| j.id == id) {
                return tier.remove(index);
            }
        }
        None
    }

    fn oldest_age(&self) -> Option<Duration> {
        self.tiers
            .iter()
            .flat_map(|t| t.iter())
            .map(DeliveryJob::age)
            .max()
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    expired: AtomicU64,
}

type ScheduledRetry = (DeliveryJob, Duration);

struct QueueCore {
    settings: QueueSettings,
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn MessagingGateway>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    hub: Arc<Hub>,
    state: Mutex<QueueState>,
    retries_tx: mpsc::UnboundedSender<ScheduledRetry>,
    retries_rx: Mutex<Option<mpsc::UnboundedReceiver<ScheduledRetry>>>,
    scheduled: AtomicUsize,
    idle: Notify,
    counters: Counters,
}

/// Handle to the delivery queue. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    core: Arc<QueueCore>,
}

impl DeliveryQueue {
    pub fn new(
        settings: QueueSettings,
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn MessagingGateway>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        hub: Arc<Hub>,
    ) -> Self {
        let (retries_tx, retries_rx) = mpsc::unbounded_channel();
        Self {
            core: Arc::new(QueueCore {
                settings,
                store,
                gateway,
                breaker,
                policy,
                hub,
                state: Mutex::new(QueueState::default()),
                retries_tx,
                retries_rx: Mutex::new(Some(retries_rx)),
                scheduled: AtomicUsize::new(0),
                idle: Notify::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.core.settings
    }

    /// Admit a job at the tail of its tier and make sure workers run.
    ///
    /// Never blocks. When full, the oldest job of the lowest tier not above
    /// this job's priority is evicted; if none qualifies the job is rejected
    /// with [`MostradorError::QueueFull`].
    pub fn enqueue(&self, job: DeliveryJob) -> Result<JobId, MostradorError> {
        self.core.admit(job, false)
    }

    pub fn len(&self) -> usize {
        self.core.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_job(&self, id: &str) -> Option<DeliveryJob> {
        self.core.state().find(id).cloned()
    }

    /// Remove a queued job and mark its message failed so recovery or an
    /// operator can pick it up again.
    pub fn remove_job(&self, id: &str) -> Option<DeliveryJob> {
        let removed = self.core.state().remove(id);
        self.core.publish_depth();
        if let Some(job) = &removed {
            info!(job_id = %job.id, message_id = %job.message_id, "delivery job removed");
            self.core.spawn_fail(job.clone(), "removed from queue".to_string());
        }
        removed
    }

    /// Drop every queued job and mark their messages failed.
    pub fn clear(&self) -> usize {
        let mut jobs = Vec::new();
        {
            let mut state = self.core.state();
            for tier in &mut state.tiers {
                jobs.extend(tier.drain(..));
            }
        }
        self.core.publish_depth();
        let count = jobs.len();
        for job in jobs {
            self.core.spawn_fail(job, "removed from queue".to_string());
        }
        if count > 0 {
            warn!(count, "delivery queue cleared");
        }
        count
    }

    /// Remove jobs older than the maximum age and mark their messages failed.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.core.state().take_expired(self.core.settings.max_job_age);
        self.core.publish_depth();
        let count = expired.len();
        for job in expired {
            warn!(
                event = "job_expired",
                job_id = %job.id,
                message_id = %job.message_id,
                age_secs = job.age().as_secs(),
                "dropping expired delivery job"
            );
            self.core.counters.expired.fetch_add(1, Ordering::Relaxed);
            mostrador_prometheus::record_delivery("expired");
            self.core.spawn_fail(job, "expired in delivery queue".to_string());
        }
        count
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.core.state();
        let counters = &self.core.counters;
        QueueStats {
            total: state.len(),
            high: state.tiers[0].len(),
            normal: state.tiers[1].len(),
            low: state.tiers[2].len(),
            active_workers: state.active_workers,
            scheduled_retries: self.core.scheduled.load(Ordering::Relaxed),
            oldest_job_age_ms: state.oldest_age().map(|d| d.as_millis() as u64),
            sent: counters.sent.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            expired: counters.expired.load(Ordering::Relaxed),
        }
    }

    /// Wait until no job is queued or in flight. Returns `false` on timeout.
    /// Retries still waiting on their backoff are not awaited.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.core.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.core.is_idle() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.core.is_idle();
            }
        }
    }

    /// Spawn the retry timer and the age sweep. The retry timer can be
    /// started once; later calls only start another sweep.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);
        if let Some(handle) = self.spawn_retry_scheduler(cancel.clone()) {
            handles.push(handle);
        }
        handles.push(self.spawn_sweeper(cancel));
        handles
    }

    fn spawn_retry_scheduler(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self
            .core
            .retries_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()?;
        let core = Arc::clone(&self.core);
        Some(tokio::spawn(async move {
            let mut timers: DelayQueue<DeliveryJob> = DelayQueue::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some((job, delay)) = rx.recv() => {
                        timers.insert(job, delay);
                    }
                    Some(expired) = timers.next(), if !timers.is_empty() => {
                        core.scheduled.fetch_sub(1, Ordering::Relaxed);
                        let job = expired.into_inner();
                        debug!(job_id = %job.id, attempt = job.attempts + 1, "re-enqueuing job after backoff");
                        if let Err(e) = core.admit(job.clone(), true) {
                            core.spawn_fail(job, e.to_string());
                        }
                    }
                }
            }
            info!(abandoned = timers.len(), "retry scheduler stopped");
        }))
    }

    fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.core.settings.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = queue.sweep_expired();
                        if expired > 0 {
                            info!(expired, "queue sweep removed expired jobs");
                        }
                    }
                }
            }
            info!("queue sweeper stopped");
        })
    }
}

impl QueueCore {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_idle(&self) -> bool {
        let state = self.state();
        state.len() == 0 && state.active_workers == 0
    }

    fn publish_depth(&self) {
        let state = self.state();
        for priority in Priority::ALL {
            mostrador_prometheus::set_queue_depth(
                &priority.to_string(),
                state.tiers[tier_index(priority)].len(),
            );
        }
        mostrador_prometheus::set_queue_workers(state.active_workers);
    }

    fn admit(self: &Arc<Self>, job: DeliveryJob, front: bool) -> Result<JobId, MostradorError> {
        let id = job.id.clone();
        let (evicted, to_spawn) = {
            let mut state = self.state();
            let mut evicted = None;
            if state.len() >= self.settings.max_size {
                match state.evict_for(job.priority) {
                    Some(old) => evicted = Some(old),
                    None => {
                        drop(state);
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        mostrador_prometheus::record_delivery("rejected");
                        warn!(
                            event = "queue_overflow",
                            capacity = self.settings.max_size,
                            priority = %job.priority,
                            message_id = %job.message_id,
                            "delivery queue full, rejecting job"
                        );
                        return Err(MostradorError::QueueFull {
                            capacity: self.settings.max_size,
                        });
                    }
                }
            }
            state.push(job, front);
            let idle_slots = self.settings.workers.saturating_sub(state.active_workers);
            let uncovered = state.len().saturating_sub(state.starting);
            let to_spawn = idle_slots.min(uncovered);
            state.active_workers += to_spawn;
            state.starting += to_spawn;
            (evicted, to_spawn)
        };
        self.publish_depth();

        for _ in 0..to_spawn {
            let core = Arc::clone(self);
            tokio::spawn(async move { core.run_worker().await });
        }

        if let Some(old) = evicted {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            mostrador_prometheus::record_delivery("evicted");
            warn!(
                event = "queue_overflow",
                evicted_job = %old.id,
                evicted_priority = %old.priority,
                message_id = %old.message_id,
                "delivery queue full, evicted oldest lower-priority job"
            );
            self.spawn_fail(old, "evicted from full delivery queue".to_string());
        }
        Ok(id)
    }

    async fn run_worker(self: Arc<Self>) {
        let mut first = true;
        loop {
            let next = {
                let mut state = self.state();
                if first {
                    state.starting -= 1;
                    first = false;
                }
                let job = state.pop();
                if job.is_none() {
                    state.active_workers -= 1;
                }
                job
            };
            self.publish_depth();
            match next {
                Some(job) => self.process(job).await,
                None => {
                    if self.is_idle() {
                        self.idle.notify_waiters();
                    }
                    return;
                }
            }
        }
    }

    async fn process(self: &Arc<Self>, mut job: DeliveryJob) {
        match self.store.get_message(job.message_id).await {
            Ok(Some(message)) if message.status.is_dispatched() => {
                debug!(job_id = %job.id, message_id = %job.message_id, "message already dispatched, skipping");
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(job_id = %job.id, message_id = %job.message_id, "message no longer exists, dropping job");
                return;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "could not load message, sending anyway");
            }
        }

        let started = Instant::now();
        let result = self
            .breaker
            .call(|| self.gateway.send(&job.to, &job.content))
            .await;
        crate::publish_breaker_state(&self.breaker);

        match result {
            Ok(receipt) => self.on_sent(&job, receipt, started.elapsed()).await,
            Err(err) => {
                let attempt = job.attempts + 1;
                if self.policy.should_retry(&err, attempt) {
                    job.attempts = attempt;
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        job_id = %job.id,
                        message_id = %job.message_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "delivery attempt failed, scheduling retry"
                    );
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    mostrador_prometheus::record_delivery("retried");
                    self.schedule_retry(job, delay).await;
                    return;
                }
                if let MostradorError::CircuitOpen { dependency } = &err {
                    mostrador_prometheus::record_circuit_rejection(dependency);
                    warn!(event = "circuit_open", message_id = %job.message_id, "delivery rejected by open circuit");
                }
                self.fail(&job, &err.to_string()).await;
            }
        }
    }

    async fn on_sent(&self, job: &DeliveryJob, receipt: SendReceipt, latency: Duration) {
        if let Err(e) = self
            .store
            .mark_sent(job.message_id, &receipt.provider_message_id)
            .await
        {
            error!(message_id = %job.message_id, error = %e, "message sent but status update failed");
        }
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        mostrador_prometheus::record_delivery("sent");
        mostrador_prometheus::record_delivery_latency(latency.as_secs_f64());
        info!(
            job_id = %job.id,
            message_id = %job.message_id,
            provider_message_id = %receipt.provider_message_id,
            attempts = job.attempts + 1,
            "message delivered to provider"
        );
        self.hub.emit_to_topic(
            &job.conversation_id,
            &HubEvent::MessageStatusUpdate {
                conversation_id: job.conversation_id.clone(),
                message_id: job.message_id,
                status: MessageStatus::Sent,
                provider_message_id: Some(receipt.provider_message_id),
                reason: None,
            },
        );
    }

    async fn schedule_retry(&self, job: DeliveryJob, delay: Duration) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        if let Err(mpsc::error::SendError((job, _))) = self.retries_tx.send((job, delay)) {
            self.scheduled.fetch_sub(1, Ordering::Relaxed);
            warn!(job_id = %job.id, message_id = %job.message_id, "retry scheduler stopped");
            self.fail(&job, "retry scheduler stopped").await;
        }
    }

    fn spawn_fail(self: &Arc<Self>, job: DeliveryJob, reason: String) {
        let core = Arc::clone(self);
        tokio::spawn(async move { core.fail(&job, &reason).await });
    }

    /// Mark the job's message failed and notify operators.
    async fn fail(&self, job: &DeliveryJob, reason: &str) {
        if let Err(e) = self
            .store
            .update_message_status(job.message_id, MessageStatus::Failed, Some(reason.to_string()))
            .await
        {
            error!(message_id = %job.message_id, error = %e, "failed to record delivery failure");
        }
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        mostrador_prometheus::record_delivery("failed");
        warn!(
            job_id = %job.id,
            message_id = %job.message_id,
            attempts = job.attempts + 1,
            reason,
            "delivery failed, handing over to recovery"
        );

        let retry_count = match self.store.get_message(job.message_id).await {
            Ok(Some(message)) => message.retry_count,
            _ => 0,
        };
        self.hub.emit_to_topic(
            &job.conversation_id,
            &HubEvent::MessageStatusUpdate {
                conversation_id: job.conversation_id.clone(),
                message_id: job.message_id,
                status: MessageStatus::Failed,
                provider_message_id: None,
                reason: Some(reason.to_string()),
            },
        );
        self.hub.emit_global(&HubEvent::MessageFailed {
            conversation_id: job.conversation_id.clone(),
            message_id: job.message_id,
            reason: reason.to_string(),
            retry_count,
            permanent: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, priority: Priority) -> DeliveryJob {
        DeliveryJob {
            id: id.to_string(),
            correlation_id: id.to_string(),
            message_id: MessageId(1),
            conversation_id: "c".into(),
            to: "+5215550001".into(),
            content: MessageContent::text("hola"),
            priority,
            attempts: 0,
            created_at: Utc::now(),
            enqueued_at: Instant::now(),
        }
    }

    fn ids(state: &mut QueueState) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(j) = state.pop() {
            out.push(j.id);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn tiers_drain_high_first_fifo_within_tier() {
        let mut state = QueueState::default();
        state.push(job("n1", Priority::Normal), false);
        state.push(job("l1", Priority::Low), false);
        state.push(job("h1", Priority::High), false);
        state.push(job("n2", Priority::Normal), false);
        state.push(job("h2", Priority::High), false);
        assert_eq!(ids(&mut state), vec!["h1", "h2", "n1", "n2", "l1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_go_to_head_of_their_tier() {
        let mut state = QueueState::default();
        state.push(job("n1", Priority::Normal), false);
        state.push(job("n2", Priority::Normal), false);
        state.push(job("retry", Priority::Normal), true);
        assert_eq!(ids(&mut state), vec!["retry", "n1", "n2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_prefers_oldest_lowest_tier() {
        let mut state = QueueState::default();
        state.push(job("n1", Priority::Normal), false);
        tokio::time::advance(Duration::from_secs(1)).await;
        state.push(job("l1", Priority::Low), false);
        tokio::time::advance(Duration::from_secs(1)).await;
        state.push(job("l2", Priority::Low), false);

        assert_eq!(state.evict_for(Priority::High).unwrap().id, "l1");
        assert_eq!(state.evict_for(Priority::Normal).unwrap().id, "l2");
        assert_eq!(state.evict_for(Priority::Normal).unwrap().id, "n1");
        assert!(state.evict_for(Priority::Normal).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn low_job_cannot_evict_higher_tiers() {
        let mut state = QueueState::default();
        state.push(job("h1", Priority::High), false);
        state.push(job("n1", Priority::Normal), false);
        assert!(state.evict_for(Priority::Low).is_none());
        assert_eq!(state.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_jobs_are_taken() {
        let mut state = QueueState::default();
        state.push(job("old", Priority::Low), false);
        tokio::time::advance(Duration::from_secs(120)).await;
        state.push(job("new", Priority::Low), false);
        let expired = state.take_expired(Duration::from_secs(60));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "old");
        assert!(state.find("new").is_some());
        assert_eq!(state.oldest_age(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_by_id() {
        let mut state = QueueState::default();
        state.push(job("a", Priority::High), false);
        state.push(job("b", Priority::Low), false);
        assert_eq!(state.remove("b").unwrap().id, "b");
        assert!(state.remove("b").is_none());
        assert_eq!(state.len(), 1);
    }
}
