// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failed-message recovery sweeps.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use mostrador_control::{RetryResult, SkipReason, WHATSAPP_BREAKER};
use mostrador_core::{
    ConversationId, ConversationStore, Message, MessageContent, MessageStatus, MostradorError,
    NewMessage, Role, SenderType,
};
use mostrador_resilience::CircuitState;
use mostrador_test_utils::{GatewayStep, TestHarness};

const CUSTOMER: &str = "+5215550001";

async fn conversation(h: &TestHarness) -> ConversationId {
    h.store
        .get_or_create_conversation(CUSTOMER, None)
        .await
        .unwrap()
        .id
}

async fn seed(
    h: &TestHarness,
    id: &ConversationId,
    client_id: &str,
    status: MessageStatus,
    age: TimeDelta,
) -> Message {
    h.store
        .create_message(NewMessage {
            conversation_id: id.clone(),
            client_id: Some(client_id.to_string()),
            provider_message_id: None,
            sender_type: SenderType::Agent,
            sender_id: Some("ana".into()),
            content: MessageContent::text(client_id),
            status,
            failure_reason: (status == MessageStatus::Failed).then(|| "scripted failure".into()),
            created_at: Utc::now() - age,
        })
        .await
        .unwrap()
}

async fn seed_failed(h: &TestHarness, id: &ConversationId, client_id: &str) -> Message {
    seed(h, id, client_id, MessageStatus::Failed, TimeDelta::minutes(5)).await
}

async fn trip_whatsapp_breaker(h: &TestHarness) {
    let breaker = h.ctx.breakers.get_or_create(WHATSAPP_BREAKER);
    for _ in 0..3 {
        let _ = breaker
            .call(|| async { Err::<(), _>(MostradorError::gateway_status(503, "down")) })
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn sweep_resends_failed_messages() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let message = seed_failed(&h, &id, "c-1").await;

    let report = h.ctx.recovery.process_failed_messages().await.unwrap();
    assert_eq!(report.found, 1);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.sent, 1);

    let stored = h.store.message(message.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.last_retry_at.is_some());
    assert_eq!(h.gateway.sent()[0].to, CUSTOMER);

    // Nothing left to do.
    let report = h.ctx.recovery.process_failed_messages().await.unwrap();
    assert_eq!(report.found, 0);
}

#[tokio::test(start_paused = true)]
async fn retry_count_stops_at_the_cap() {
    let h = TestHarness::new();
    h.gateway.set_fallback(GatewayStep::Status(400));
    let id = conversation(&h).await;
    let message = seed_failed(&h, &id, "c-1").await;
    let mut supervisor = h.connect("sofia", Role::Supervisor);

    for expected in 1..=3u32 {
        let report = h.ctx.recovery.process_failed_messages().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(h.store.message(message.id).unwrap().retry_count, expected);
    }

    let frames = TestHarness::frames(&mut supervisor);
    let permanence: Vec<bool> = frames
        .iter()
        .filter(|f| f["event"] == "message_failed")
        .map(|f| f["data"]["permanent"].as_bool().unwrap())
        .collect();
    assert_eq!(permanence, vec![false, false, true]);

    let report = h.ctx.recovery.process_failed_messages().await.unwrap();
    assert_eq!(report.found, 1);
    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.gateway.calls(), 3);

    let stored = h.store.message(message.id).unwrap();
    assert_eq!(
        h.ctx.recovery.retry_message(&stored, false).await.unwrap(),
        RetryResult::Skipped {
            reason: SkipReason::AtCap
        }
    );

    // An operator may still push it through; the counter stays capped.
    h.gateway.set_fallback(GatewayStep::Accept);
    match h.ctx.recovery.retry_message_by_id(message.id).await.unwrap() {
        RetryResult::Sent { retry_count, .. } => assert_eq!(retry_count, 3),
        other => panic!("expected sent, got {other:?}"),
    }
    let stored = h.store.message(message.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.retry_count, 3);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_halts_sweep_without_spending_retries() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let first = seed_failed(&h, &id, "c-1").await;
    let second = seed_failed(&h, &id, "c-2").await;
    trip_whatsapp_breaker(&h).await;

    let report = h.ctx.recovery.process_failed_messages().await.unwrap();
    assert!(report.halted_by_circuit);
    assert_eq!(report.attempted, 0);
    assert_eq!(h.gateway.calls(), 0);
    assert_eq!(h.store.message(first.id).unwrap().retry_count, 0);

    // After the recovery timeout one probe goes first, then the rest.
    tokio::time::advance(Duration::from_secs(31)).await;
    let report = h.ctx.recovery.process_failed_messages().await.unwrap();
    assert!(!report.halted_by_circuit);
    assert_eq!(report.sent, 2);
    assert_eq!(
        h.ctx.breakers.get(WHATSAPP_BREAKER).unwrap().state(),
        CircuitState::Closed
    );
    for message in [first, second] {
        let stored = h.store.message(message.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(stored.retry_count, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn circuit_opening_mid_batch_spends_no_retries() {
    let h = TestHarness::new();
    h.gateway.set_fallback(GatewayStep::Status(503));
    let id = conversation(&h).await;
    let mut messages = Vec::new();
    for n in 0..6 {
        messages.push(seed_failed(&h, &id, &format!("c-{n}")).await);
    }

    let report = h.ctx.recovery.process_failed_messages().await.unwrap();
    assert!(report.halted_by_circuit);
    assert_eq!(report.found, 6);
    assert_eq!(report.failed, 3);
    assert_eq!(report.skipped, 3);
    assert_eq!(h.gateway.calls(), 3);
    assert_eq!(
        h.ctx.breakers.get(WHATSAPP_BREAKER).unwrap().state(),
        CircuitState::Open
    );

    let counted: u32 = messages
        .iter()
        .map(|m| h.store.message(m.id).unwrap().retry_count)
        .sum();
    assert_eq!(counted, h.gateway.calls());

    for message in &messages[3..] {
        let stored = h.store.message(message.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.failure_reason.as_deref(), Some("scripted failure"));
    }
}

#[tokio::test(start_paused = true)]
async fn manual_retry_reports_open_circuit() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let message = seed_failed(&h, &id, "c-1").await;
    trip_whatsapp_breaker(&h).await;

    assert_eq!(
        h.ctx.recovery.retry_message_by_id(message.id).await.unwrap(),
        RetryResult::Skipped {
            reason: SkipReason::CircuitOpen
        }
    );
    assert_eq!(h.store.message(message.id).unwrap().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn retry_of_unknown_or_healthy_message() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let sent = seed(&h, &id, "c-1", MessageStatus::Sent, TimeDelta::zero()).await;

    assert_eq!(
        h.ctx.recovery.retry_message_by_id(sent.id).await.unwrap(),
        RetryResult::Skipped {
            reason: SkipReason::NotFailed
        }
    );
    let err = h
        .ctx
        .recovery
        .retry_message_by_id(mostrador_core::MessageId(999))
        .await
        .unwrap_err();
    assert!(matches!(err, MostradorError::NotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn batches_are_paced() {
    let h = TestHarness::builder()
        .with_settings(|s| {
            s.recovery.batch_size = 2;
            s.recovery.batch_pause = Duration::from_secs(1);
        })
        .build();
    let id = conversation(&h).await;
    for n in 0..5 {
        seed_failed(&h, &id, &format!("c-{n}")).await;
    }

    let started = tokio::time::Instant::now();
    let report = h.ctx.recovery.process_failed_messages().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.sent, 5);
    // Three batches, two pauses.
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn cleanup_deletes_only_expired_failures() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let old = seed(&h, &id, "old", MessageStatus::Failed, TimeDelta::hours(25)).await;
    let recent = seed_failed(&h, &id, "recent").await;
    let old_sent = seed(&h, &id, "old-sent", MessageStatus::Sent, TimeDelta::hours(25)).await;

    assert_eq!(h.ctx.recovery.cleanup().await.unwrap(), 1);
    assert!(h.store.message(old.id).is_none());
    assert!(h.store.message(recent.id).is_some());
    assert!(h.store.message(old_sent.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn stale_pending_messages_become_recoverable() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let stale = seed(&h, &id, "stale", MessageStatus::Pending, TimeDelta::minutes(10)).await;
    let fresh = seed(&h, &id, "fresh", MessageStatus::Pending, TimeDelta::zero()).await;

    let count = h
        .ctx
        .recovery
        .recover_stale_pending(Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(count, 1);

    let stored = h.store.message(stale.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Failed);
    assert_eq!(
        stored.failure_reason.as_deref(),
        Some("interrupted before delivery")
    );
    assert_eq!(
        h.store.message(fresh.id).unwrap().status,
        MessageStatus::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn stats_and_listing() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let a = seed(&h, &id, "a", MessageStatus::Failed, TimeDelta::minutes(3)).await;
    let b = seed(&h, &id, "b", MessageStatus::Failed, TimeDelta::minutes(2)).await;
    let c = seed(&h, &id, "c", MessageStatus::Failed, TimeDelta::minutes(1)).await;
    h.store.edit_message(a.id, |m| m.retry_count = 3);
    h.store.edit_message(b.id, |m| m.retry_count = 1);

    let stats = h.ctx.recovery.retry_stats().await.unwrap();
    assert_eq!(stats.failed_total, 3);
    assert_eq!(stats.at_cap, 1);
    assert_eq!(stats.retryable, 2);
    assert!((stats.average_retries - 4.0 / 3.0).abs() < 1e-9);
    assert_eq!(stats.max_retries, 3);

    let page: Vec<_> = h
        .ctx
        .recovery
        .list_failed(2, 1)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(page, vec![b.id, c.id]);
}

#[tokio::test(start_paused = true)]
async fn periodic_sweep_runs_in_background() {
    let mut h = TestHarness::builder()
        .with_settings(|s| s.recovery.interval = Duration::from_secs(10))
        .build();
    h.start();
    let id = conversation(&h).await;
    let message = seed_failed(&h, &id, "c-1").await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(
        h.store.message(message.id).unwrap().status,
        MessageStatus::Sent
    );
}
