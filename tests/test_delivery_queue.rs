//! Integration tests for the delivery queue
//!
//! Acknowledgment semantics across recipients, dedup, expiry and reload.

use std::time::Duration;

use chrono::Utc;
use kodegen_claude_companion::queue::{DeliveryQueue, QueueSettings};
use kodegen_claude_companion::{Fingerprint, OutboundEnvelope, SessionId};
use serde_json::json;

fn settings() -> QueueSettings {
    QueueSettings {
        message_ttl: Duration::from_secs(3600),
        dedup_window: Duration::from_secs(5),
    }
}

fn result(text: &str) -> OutboundEnvelope {
    OutboundEnvelope::new(
        "conversationResult",
        None,
        json!({"sessionId": "s1", "text": text, "success": true}),
    )
}

#[test]
fn test_message_survives_until_every_recipient_acks() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = DeliveryQueue::new(settings(), dir.path().join("q.json"));
    let session = SessionId::new("s1");
    let phone = Fingerprint::new("phone");
    let tablet = Fingerprint::new("tablet");

    queue.register_recipient(&session, &phone);
    queue.register_recipient(&session, &tablet);
    let id = queue.enqueue(&session, result("hello")).unwrap();

    assert_eq!(queue.acknowledge(&session, std::slice::from_ref(&id), &phone), 1);
    assert_eq!(queue.len_for(&session), 1);
    assert!(queue.pending_for(&session, &phone, Utc::now()).is_empty());
    assert_eq!(queue.pending_for(&session, &tablet, Utc::now()).len(), 1);

    assert_eq!(queue.acknowledge(&session, &[id], &tablet), 1);
    assert!(queue.is_empty());
}

#[test]
fn test_purged_message_is_not_replayed_to_new_attacher() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = DeliveryQueue::new(settings(), dir.path().join("q.json"));
    let session = SessionId::new("s1");
    let phone = Fingerprint::new("phone");

    queue.register_recipient(&session, &phone);
    let id = queue.enqueue(&session, result("once")).unwrap();
    queue.acknowledge(&session, &[id], &phone);

    let laptop = Fingerprint::new("laptop");
    queue.register_recipient(&session, &laptop);
    assert!(queue.pending_for(&session, &laptop, Utc::now()).is_empty());
}

#[test]
fn test_delivered_but_unacked_is_redelivered() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = DeliveryQueue::new(settings(), dir.path().join("q.json"));
    let session = SessionId::new("s1");
    let phone = Fingerprint::new("phone");

    let id = queue.enqueue(&session, result("hi")).unwrap();
    queue.mark_delivered(&session, std::slice::from_ref(&id), &phone);

    let pending = queue.pending_for(&session, &phone, Utc::now());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message_id.as_ref(), Some(&id));
}

#[test]
fn test_drain_order_is_enqueue_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = DeliveryQueue::new(settings(), dir.path().join("q.json"));
    let session = SessionId::new("s1");
    for text in ["one", "two", "three"] {
        queue.enqueue(&session, result(text)).unwrap();
    }
    let texts: Vec<_> = queue
        .pending_for(&session, &Fingerprint::new("fp"), Utc::now())
        .into_iter()
        .map(|e| e.data["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, ["one", "two", "three"]);
}

#[test]
fn test_duplicates_within_window_are_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = DeliveryQueue::new(settings(), dir.path().join("q.json"));
    let session = SessionId::new("s1");
    let t0 = Utc::now();

    assert!(queue.enqueue_at(&session, result("same"), t0).is_some());
    assert!(
        queue
            .enqueue_at(&session, result("same"), t0 + chrono::Duration::seconds(1))
            .is_none()
    );
    assert!(
        queue
            .enqueue_at(&session, result("same"), t0 + chrono::Duration::seconds(10))
            .is_some()
    );
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_expired_messages_are_never_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = DeliveryQueue::new(settings(), dir.path().join("q.json"));
    let session = SessionId::new("s1");
    let past = Utc::now() - chrono::Duration::hours(2);
    queue.enqueue_at(&session, result("stale"), past).unwrap();

    assert!(queue.pending_for(&session, &Fingerprint::new("fp"), Utc::now()).is_empty());
    assert_eq!(queue.purge_expired(Utc::now()), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_queue_reloads_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.json");
    let session = SessionId::new("s1");
    let phone = Fingerprint::new("phone");

    {
        let mut queue = DeliveryQueue::new(settings(), &path);
        queue.register_recipient(&session, &phone);
        queue.enqueue(&session, result("kept")).unwrap();
        queue.persist().await.unwrap();
    }

    let mut queue = DeliveryQueue::new(settings(), &path);
    assert_eq!(queue.load(Utc::now()).await.unwrap(), 1);
    let pending = queue.pending_for(&session, &phone, Utc::now());
    assert_eq!(pending.len(), 1);

    // Recipients survive the reload too
    let id = pending[0].message_id.clone().unwrap();
    queue.acknowledge(&session, &[id], &phone);
    assert!(queue.is_empty());
}
