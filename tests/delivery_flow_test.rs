// Delivery flow tests
//
// Drives the fan-out gateway, scheduler and state dispatcher end to end
// against the in-memory collaborators:
// 1. live delivery with sender echo and delivery receipt
// 2. calm-mode and time-boundary queuing
// 3. sweep and deactivation-flush release, including the sweep retry
// 4. read watermarks, typing, unhide

mod common;

use chrono::{Duration, TimeZone, Utc, Weekday};
use common::{monday_at, utc_boundary, Harness};
use delivery_service::error::{AppError, ErrorKind};
use delivery_service::models::{ConversationStatus, MessageStatus, QueuedReason};
use delivery_service::services::activity::{DailyCounter, GuardianAlert};
use delivery_service::services::state_events::StateUpdate;
use delivery_service::websocket::SendRequest;
use uuid::Uuid;

fn text(conversation_id: Uuid, content: &str) -> SendRequest {
    SendRequest {
        conversation_id,
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn live_message_is_echoed_delivered_and_receipted() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    alice_conn.drain();
    bob_conn.drain();

    let outcome = h
        .gateway()
        .send(
            alice,
            SendRequest {
                client_correlation_token: Some("c-1".into()),
                ..text(conv.id, "hello")
            },
        )
        .await
        .expect("send accepted");

    assert!(!outcome.decision.is_queued());
    assert_eq!(outcome.message.status, MessageStatus::Delivered);
    assert!(outcome.message.delivered_at.is_some());

    let alice_frames = alice_conn.drain();
    assert_eq!(alice_frames.len(), 2);
    assert_eq!(alice_frames[0]["type"], "message.new");
    assert_eq!(alice_frames[0]["client_correlation_token"], "c-1");
    assert_eq!(alice_frames[0]["message"]["status"], "sent");
    assert_eq!(alice_frames[1]["type"], "message.delivered");
    assert_eq!(
        alice_frames[1]["message_id"],
        outcome.message.id.to_string()
    );

    let bob_frames = bob_conn.drain();
    assert_eq!(bob_frames.len(), 1);
    assert_eq!(bob_frames[0]["type"], "message.new");
    assert_eq!(bob_frames[0]["message"]["content"], "hello");
    assert!(bob_frames[0].get("client_correlation_token").is_none());

    assert_eq!(h.activity.total(alice, DailyCounter::MessagesSent), 1);
    assert_eq!(h.activity.total(bob, DailyCounter::MessagesReceived), 1);
}

#[tokio::test]
async fn offline_recipient_message_stays_sent() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut alice_conn = h.connect(alice).await;
    alice_conn.drain();

    let outcome = h.gateway().send(alice, text(conv.id, "hi")).await.unwrap();

    assert_eq!(outcome.message.status, MessageStatus::Sent);
    assert_eq!(alice_conn.drain_types(), vec!["message.new"]);
}

#[tokio::test]
async fn do_not_disturb_recipient_gets_queued_without_broadcast() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    h.set_do_not_disturb(bob, true).await;
    let mut alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    alice_conn.drain();
    bob_conn.drain();

    let outcome = h.gateway().send(alice, text(conv.id, "later")).await.unwrap();

    assert_eq!(outcome.message.status, MessageStatus::Queued);
    assert_eq!(
        outcome.message.queued_reason,
        Some(QueuedReason::RecipientCalmMode)
    );
    assert_eq!(outcome.message.deliver_at, None);

    assert!(bob_conn.drain().is_empty());
    let echo = alice_conn.drain();
    assert_eq!(echo.len(), 1);
    assert_eq!(echo[0]["message"]["status"], "queued");
    assert_eq!(echo[0]["message"]["queued_reason"], "recipient_calm_mode");
    assert_eq!(h.activity.total(bob, DailyCounter::MessagesReceived), 0);
}

#[tokio::test]
async fn rejected_sends_persist_nothing() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut bob_conn = h.connect(bob).await;
    bob_conn.drain();

    h.conversations.block(bob, alice);
    let err = h.gateway().send(alice, text(conv.id, "hi")).await.unwrap_err();
    assert!(matches!(err, AppError::ConversationBlocked));
    assert_eq!(err.kind(), ErrorKind::Rejection);

    let archived = h.conversation(alice, carol);
    h.conversations
        .set_status(archived.id, ConversationStatus::Archived);
    let err = h
        .gateway()
        .send(alice, text(archived.id, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConversationInactive));

    let err = h.gateway().send(carol, text(conv.id, "hi")).await.unwrap_err();
    assert!(matches!(err, AppError::NotParticipant));

    let own = h.conversation(alice, alice);
    let err = h.gateway().send(alice, text(own.id, "hi")).await.unwrap_err();
    assert!(matches!(err, AppError::SelfAddressed));

    let err = h.gateway().send(alice, text(conv.id, "   ")).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyContent));

    let too_long = "x".repeat(h.state.config.max_message_length + 1);
    let err = h
        .gateway()
        .send(alice, text(conv.id, &too_long))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ContentTooLong { .. }));

    assert_eq!(h.ledger.count(), 0);
    assert!(bob_conn.drain().is_empty());
}

#[tokio::test]
async fn ledger_outage_surfaces_a_transient_failure() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    alice_conn.drain();
    bob_conn.drain();

    h.ledger.set_unavailable(true);
    let err = h.gateway().send(alice, text(conv.id, "hi")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(alice_conn.drain().is_empty());
    assert!(bob_conn.drain().is_empty());
}

#[tokio::test]
async fn before_window_message_is_released_by_the_sweep() {
    let h = Harness::new(monday_at(7, 30));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    h.availability
        .set_boundaries(bob, vec![utc_boundary(Weekday::Mon, (9, 0), (21, 0))]);
    let mut alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    alice_conn.drain();
    bob_conn.drain();

    let outcome = h.gateway().send(alice, text(conv.id, "morning")).await.unwrap();
    assert_eq!(outcome.message.status, MessageStatus::Queued);
    assert_eq!(
        outcome.message.queued_reason,
        Some(QueuedReason::OutsideTimeBoundary)
    );
    assert_eq!(outcome.message.deliver_at, Some(monday_at(9, 0)));

    assert_eq!(h.background.scheduler.sweep().await, 0);
    assert!(bob_conn.drain().is_empty());

    h.clock.set(monday_at(9, 0));
    assert_eq!(h.background.scheduler.sweep().await, 1);

    let frames = bob_conn.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "message.new");
    assert_eq!(frames[0]["message"]["id"], outcome.message.id.to_string());
    assert_eq!(alice_conn.drain_types(), vec!["message.delivered"]);

    let stored = h.ledger.all();
    assert_eq!(stored[0].status, MessageStatus::Delivered);

    // nothing left to release
    assert_eq!(h.background.scheduler.sweep().await, 0);
}

#[tokio::test]
async fn after_window_message_waits_for_next_configured_day() {
    let h = Harness::new(monday_at(22, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    h.availability.set_boundaries(
        bob,
        vec![
            utc_boundary(Weekday::Mon, (9, 0), (21, 0)),
            utc_boundary(Weekday::Wed, (10, 30), (18, 0)),
        ],
    );

    let outcome = h.gateway().send(alice, text(conv.id, "late")).await.unwrap();

    assert_eq!(outcome.message.status, MessageStatus::Queued);
    assert_eq!(
        outcome.message.deliver_at,
        Some(Utc.with_ymd_and_hms(2024, 3, 6, 10, 30, 0).unwrap())
    );
}

#[tokio::test]
async fn concurrent_sweeps_release_a_message_once() {
    let h = Harness::new(monday_at(7, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    h.availability
        .set_boundaries(bob, vec![utc_boundary(Weekday::Mon, (8, 0), (20, 0))]);
    let mut bob_conn = h.connect(bob).await;

    h.gateway().send(alice, text(conv.id, "once")).await.unwrap();
    bob_conn.drain();
    h.clock.advance(Duration::hours(2));

    let scheduler = &h.background.scheduler;
    let (first, second) = tokio::join!(scheduler.sweep(), scheduler.sweep());

    assert_eq!(first + second, 1);
    assert_eq!(bob_conn.drain_types(), vec!["message.new"]);
    assert_eq!(h.activity.total(bob, DailyCounter::MessagesReceived), 1);
}

fn contents(frames: &[serde_json::Value]) -> Vec<String> {
    frames
        .iter()
        .filter(|f| f["type"] == "message.new")
        .map(|f| f["message"]["content"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn deactivating_do_not_disturb_flushes_only_that_recipient() {
    let mut h = Harness::new(monday_at(10, 0));
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let to_bob = h.conversation(alice, bob);
    let to_carol = h.conversation(alice, carol);
    h.set_do_not_disturb(carol, true).await;
    let mut bob_conn = h.connect(bob).await;

    h.set_do_not_disturb_via_update(bob, true).await;
    assert_eq!(h.dispatch_pending().await, 1);
    assert_eq!(
        h.activity.alerts(),
        vec![(bob, GuardianAlert::DoNotDisturbActivated)]
    );

    let first = h.gateway().send(alice, text(to_bob.id, "one")).await.unwrap();
    let second = h.gateway().send(alice, text(to_bob.id, "two")).await.unwrap();
    let other = h.gateway().send(alice, text(to_carol.id, "three")).await.unwrap();
    assert!(first.decision.is_queued() && second.decision.is_queued());
    bob_conn.drain();

    h.clock.advance(Duration::minutes(30));
    h.set_do_not_disturb_via_update(bob, false).await;

    // released before the update returns, ahead of the peer broadcast
    assert_eq!(contents(&bob_conn.drain()), vec!["one", "two"]);

    assert_eq!(h.dispatch_pending().await, 1);
    let frames = bob_conn.drain();
    assert!(contents(&frames).is_empty());
    assert!(frames.iter().any(|f| f["type"] == "presence.state_changed"
        && f["do_not_disturb_active"] == false));

    let stored = h.ledger.all();
    let status_of = |id: Uuid| stored.iter().find(|m| m.id == id).map(|m| m.status);
    assert_eq!(status_of(first.message.id), Some(MessageStatus::Delivered));
    assert_eq!(status_of(second.message.id), Some(MessageStatus::Delivered));
    assert_eq!(status_of(other.message.id), Some(MessageStatus::Queued));

    assert_eq!(h.activity.total(bob, DailyCounter::DoNotDisturbMinutes), 30);
}

#[tokio::test]
async fn reactivated_do_not_disturb_keeps_new_messages_queued() {
    let mut h = Harness::new(monday_at(10, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut bob_conn = h.connect(bob).await;

    h.set_do_not_disturb_via_update(bob, true).await;
    let before = h.gateway().send(alice, text(conv.id, "before")).await.unwrap();
    assert!(before.decision.is_queued());
    bob_conn.drain();

    h.clock.advance(Duration::minutes(10));
    let off_at = h.clock_now();
    h.set_do_not_disturb_via_update(bob, false).await;
    h.clock.advance(Duration::minutes(10));
    h.set_do_not_disturb_via_update(bob, true).await;
    h.clock.advance(Duration::minutes(10));
    let during = h.gateway().send(alice, text(conv.id, "during")).await.unwrap();
    assert!(during.decision.is_queued());

    // the on/off/on changes reach the dispatcher only now
    assert_eq!(h.dispatch_pending().await, 3);
    assert_eq!(h.state.scheduler.flush_calm_mode(bob, off_at).await, 0);
    assert_eq!(h.background.scheduler.sweep().await, 0);

    assert_eq!(contents(&bob_conn.drain()), vec!["before"]);
    let stored = h.ledger.all();
    let status_of = |id: Uuid| stored.iter().find(|m| m.id == id).map(|m| m.status);
    assert_eq!(status_of(before.message.id), Some(MessageStatus::Delivered));
    assert_eq!(status_of(during.message.id), Some(MessageStatus::Queued));
}

#[tokio::test]
async fn send_after_deactivation_arrives_behind_the_backlog() {
    let mut h = Harness::new(monday_at(10, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut bob_conn = h.connect(bob).await;

    h.set_do_not_disturb_via_update(bob, true).await;
    h.dispatch_pending().await;
    let first = h.gateway().send(alice, text(conv.id, "first")).await.unwrap();
    assert!(first.decision.is_queued());
    bob_conn.drain();

    h.clock.advance(Duration::minutes(5));
    h.set_do_not_disturb_via_update(bob, false).await;
    let second = h.gateway().send(alice, text(conv.id, "second")).await.unwrap();
    assert!(!second.decision.is_queued());
    h.dispatch_pending().await;

    assert_eq!(contents(&bob_conn.drain()), vec!["first", "second"]);
    assert!(h
        .ledger
        .all()
        .iter()
        .all(|m| m.status == MessageStatus::Delivered));
}

#[tokio::test]
async fn sweep_retries_a_failed_calm_mode_flush() {
    let mut h = Harness::new(monday_at(10, 0));
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let to_bob = h.conversation(alice, bob);
    let to_carol = h.conversation(alice, carol);
    h.set_do_not_disturb(carol, true).await;
    let mut bob_conn = h.connect(bob).await;

    h.set_do_not_disturb_via_update(bob, true).await;
    let held = h.gateway().send(alice, text(to_bob.id, "held")).await.unwrap();
    let still_held = h.gateway().send(alice, text(to_carol.id, "still held")).await.unwrap();
    assert!(held.decision.is_queued() && still_held.decision.is_queued());
    bob_conn.drain();

    h.ledger.set_unavailable(true);
    h.clock.advance(Duration::minutes(5));
    h.set_do_not_disturb_via_update(bob, false).await;
    h.dispatch_pending().await;
    assert!(contents(&bob_conn.drain()).is_empty());
    h.ledger.set_unavailable(false);

    let stored = h.ledger.all();
    let status_of = |id: Uuid| stored.iter().find(|m| m.id == id).map(|m| m.status);
    assert_eq!(status_of(held.message.id), Some(MessageStatus::Queued));

    h.clock.advance(Duration::minutes(1));
    assert_eq!(h.background.scheduler.sweep().await, 1);
    assert_eq!(contents(&bob_conn.drain()), vec!["held"]);

    let stored = h.ledger.all();
    let status_of = |id: Uuid| stored.iter().find(|m| m.id == id).map(|m| m.status);
    assert_eq!(status_of(held.message.id), Some(MessageStatus::Delivered));
    assert_eq!(status_of(still_held.message.id), Some(MessageStatus::Queued));
}

#[tokio::test]
async fn repeated_do_not_disturb_value_publishes_nothing() {
    let mut h = Harness::new(monday_at(10, 0));
    let bob = Uuid::new_v4();

    h.set_do_not_disturb_via_update(bob, false).await;
    assert_eq!(h.dispatch_pending().await, 0);

    let err = h
        .update_state(bob, StateUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn read_watermark_advances_once_and_never_regresses() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut alice_conn = h.connect(alice).await;
    let _bob_conn = h.connect(bob).await;

    let m1 = h.gateway().send(alice, text(conv.id, "1")).await.unwrap().message;
    let reply = h.gateway().send(bob, text(conv.id, "reply")).await.unwrap().message;
    let m2 = h.gateway().send(alice, text(conv.id, "2")).await.unwrap().message;
    let m3 = h.gateway().send(alice, text(conv.id, "3")).await.unwrap().message;
    assert!(reply.sequence_number > m1.sequence_number);
    assert!(reply.sequence_number < m2.sequence_number);
    alice_conn.drain();

    let outcome = h.gateway().mark_read(bob, conv.id, m2.id).await.unwrap();
    assert_eq!(outcome.advanced, vec![m1.id, m2.id]);

    let receipts = alice_conn.drain();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0]["type"], "message.read_receipt");
    assert_eq!(receipts[0]["message_id"], m2.id.to_string());

    let outcome = h.gateway().mark_read(bob, conv.id, m1.id).await.unwrap();
    assert!(outcome.advanced.is_empty());
    assert!(alice_conn.drain().is_empty());

    let stored = h.ledger.all();
    let status_of = |id: Uuid| stored.iter().find(|m| m.id == id).map(|m| m.status);
    assert_eq!(status_of(m1.id), Some(MessageStatus::Read));
    assert_eq!(status_of(m2.id), Some(MessageStatus::Read));
    assert_eq!(status_of(m3.id), Some(MessageStatus::Delivered));
    // bob's own message is not his to read
    assert_eq!(status_of(reply.id), Some(MessageStatus::Delivered));

    let err = h
        .gateway()
        .mark_read(bob, conv.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MessageNotFound));
}

#[tokio::test]
async fn typing_skips_every_connection_of_the_typist() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    let mut phone = h.connect(alice).await;
    let mut laptop = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    phone.drain();
    laptop.drain();
    bob_conn.drain();

    let identity = delivery_service::services::AuthenticatedIdentity {
        user_id: alice,
        display_name: "Alice".into(),
    };
    let reached = h.gateway().typing(&identity, conv.id).await.unwrap();

    assert_eq!(reached, 1);
    assert!(phone.drain().is_empty());
    assert!(laptop.drain().is_empty());
    let frames = bob_conn.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "message.typing");
    assert_eq!(frames[0]["display_name"], "Alice");
}

#[tokio::test]
async fn live_message_unhides_the_conversation_for_the_recipient() {
    let h = Harness::new(monday_at(12, 0));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conv = h.conversation(alice, bob);
    h.conversations.hide(bob, conv.id);
    let mut bob_conn = h.connect(bob).await;
    bob_conn.drain();

    h.gateway().send(alice, text(conv.id, "back?")).await.unwrap();

    assert_eq!(
        bob_conn.drain_types(),
        vec!["conversation.unhidden", "message.new"]
    );
    assert!(!h.conversations.is_hidden(bob, conv.id));

    h.gateway().send(alice, text(conv.id, "again")).await.unwrap();
    assert_eq!(bob_conn.drain_types(), vec!["message.new"]);
}
