// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-plane integration tests over the in-memory store.

use mostrador_control::ResponderDecision;
use mostrador_core::{AiMode, ControlMode, ConversationId, ConversationStore, MostradorError, Role};
use mostrador_test_utils::TestHarness;

async fn conversation(harness: &TestHarness) -> ConversationId {
    harness
        .store
        .get_or_create_conversation("+5215550001", Some("Lucía"))
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn takeover_requires_an_actor() {
    let h = TestHarness::new();
    let id = conversation(&h).await;

    let err = h
        .ctx
        .control
        .set_mode(&id, ControlMode::Takeover, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MostradorError::Validation(_)));

    let err = h
        .ctx
        .control
        .set_mode(&id, ControlMode::Takeover, Some("  "), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MostradorError::Validation(_)));
}

#[tokio::test]
async fn takeover_assigns_agent_and_suppresses_responder() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    assert!(h.ctx.control.can_automated_responder_act(&id).await);

    let updated = h
        .ctx
        .control
        .set_mode(&id, ControlMode::Takeover, Some("ana"), Some("vip customer"))
        .await
        .unwrap();
    assert_eq!(updated.control_mode, ControlMode::Takeover);
    assert_eq!(updated.assigned_agent_id.as_deref(), Some("ana"));
    assert_eq!(updated.ai_mode, AiMode::Inactive);

    assert_eq!(
        h.ctx.control.evaluate(&id).await.unwrap(),
        ResponderDecision::SuppressedByTakeover
    );
    assert!(!h.ctx.control.can_automated_responder_act(&id).await);
}

#[tokio::test]
async fn release_hands_back_and_is_audited() {
    let h = TestHarness::new();
    let id = conversation(&h).await;

    h.ctx
        .control
        .set_mode(&id, ControlMode::Takeover, Some("ana"), None)
        .await
        .unwrap();
    let released = h
        .ctx
        .control
        .release(&id, Some("ana"), Some("resolved"))
        .await
        .unwrap();
    assert_eq!(released.control_mode, ControlMode::Spectator);
    assert_eq!(released.assigned_agent_id, None);
    assert_eq!(released.ai_mode, AiMode::Active);
    assert!(h.ctx.control.can_automated_responder_act(&id).await);

    let history = h.ctx.control.mode_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].previous_mode, ControlMode::Spectator);
    assert_eq!(history[0].new_mode, ControlMode::Takeover);
    assert_eq!(history[0].new_ai_mode, AiMode::Inactive);
    assert_eq!(history[1].previous_mode, ControlMode::Takeover);
    assert_eq!(history[1].new_mode, ControlMode::Spectator);
    assert_eq!(history[1].reason.as_deref(), Some("resolved"));
}

#[tokio::test]
async fn reapplying_current_mode_is_rejected() {
    let h = TestHarness::new();
    let id = conversation(&h).await;

    let err = h
        .ctx
        .control
        .set_mode(&id, ControlMode::Spectator, Some("ana"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MostradorError::Validation(_)));
    assert!(h.ctx.control.mode_history(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn takeover_by_another_agent_reassigns() {
    let h = TestHarness::new();
    let id = conversation(&h).await;

    h.ctx
        .control
        .set_mode(&id, ControlMode::Takeover, Some("ana"), None)
        .await
        .unwrap();
    let updated = h
        .ctx
        .control
        .set_mode(&id, ControlMode::Takeover, Some("beto"), None)
        .await
        .unwrap();
    assert_eq!(updated.assigned_agent_id.as_deref(), Some("beto"));
}

#[tokio::test]
async fn concurrent_identical_takeovers_apply_once() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let control = &h.ctx.control;

    let (a, b) = tokio::join!(
        control.set_mode(&id, ControlMode::Takeover, Some("ana"), None),
        control.set_mode(&id, ControlMode::Takeover, Some("ana"), None),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(control.mode_history(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn ai_only_ignores_paused_ai_mode() {
    let h = TestHarness::new();
    let id = conversation(&h).await;

    h.ctx
        .control
        .set_mode(&id, ControlMode::AiOnly, Some("supervisor"), None)
        .await
        .unwrap();
    h.ctx
        .control
        .set_ai_mode(&id, AiMode::Paused, Some("supervisor"), None)
        .await
        .unwrap();
    assert_eq!(
        h.ctx.control.evaluate(&id).await.unwrap(),
        ResponderDecision::Allowed
    );
}

#[tokio::test]
async fn paused_ai_mode_suppresses_spectator() {
    let h = TestHarness::new();
    let id = conversation(&h).await;

    h.ctx
        .control
        .set_ai_mode(&id, AiMode::Paused, Some("ana"), Some("lunch"))
        .await
        .unwrap();
    assert_eq!(
        h.ctx.control.evaluate(&id).await.unwrap(),
        ResponderDecision::SuppressedByAiMode(AiMode::Paused)
    );

    let err = h
        .ctx
        .control
        .set_ai_mode(&id, AiMode::Paused, Some("ana"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MostradorError::Validation(_)));

    let history = h.ctx.control.mode_history(&id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous_mode, history[0].new_mode);
    assert_eq!(history[0].new_ai_mode, AiMode::Paused);
}

#[tokio::test]
async fn unknown_conversation_fails_closed() {
    let h = TestHarness::new();
    let missing = ConversationId::from("does-not-exist");

    assert!(!h.ctx.control.can_automated_responder_act(&missing).await);
    let err = h.ctx.control.evaluate(&missing).await.unwrap_err();
    assert!(matches!(err, MostradorError::NotFound { .. }));
    let err = h
        .ctx
        .control
        .set_mode(&missing, ControlMode::Takeover, Some("ana"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MostradorError::NotFound { .. }));
}

#[tokio::test]
async fn store_failure_fails_closed() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    h.store.fail_writes(true);

    let err = h
        .ctx
        .control
        .set_mode(&id, ControlMode::Takeover, Some("ana"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MostradorError::Storage { .. }));
    // Nothing was applied.
    h.store.fail_writes(false);
    assert!(h.ctx.control.can_automated_responder_act(&id).await);
}

#[tokio::test]
async fn mode_change_reaches_topic_members_and_everyone_else_once() {
    let h = TestHarness::new();
    let id = conversation(&h).await;
    let mut supervisor = h.connect("sofia", Role::Supervisor);
    let mut agent = h.connect("ana", Role::Agent);
    h.hub.join_topic(&agent.id, &id).unwrap();
    // Drop the presence notice and the join acknowledgement.
    TestHarness::frames(&mut supervisor);
    TestHarness::frames(&mut agent);

    h.ctx
        .control
        .set_mode(&id, ControlMode::Takeover, Some("ana"), None)
        .await
        .unwrap();

    let frames = TestHarness::frames(&mut supervisor);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["event"], "conversation_mode_changed");
    assert_eq!(frames[0]["data"]["new_mode"], "takeover");
    assert_eq!(frames[0]["data"]["assigned_agent_id"], "ana");
    assert_eq!(
        TestHarness::event_names(&mut agent),
        vec!["conversation_mode_changed"]
    );
}
