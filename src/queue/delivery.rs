//! Durable per-session outbox
//!
//! Messages for sessions without an attached client are held here until every
//! recipient that was ever attached to the session has acknowledged them, or
//! until they expire. Recipients are device fingerprints, so a reconnecting
//! device keeps its identity.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::storage::SnapshotFile;
use crate::types::envelope::OutboundEnvelope;
use crate::types::identifiers::{Fingerprint, MessageId, SessionId};

use super::fingerprint::content_hash;

/// One queued delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    /// Envelope as it will be sent, `messageId` already set
    pub payload: OutboundEnvelope,
    pub content_hash: String,
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_to: BTreeSet<Fingerprint>,
    #[serde(default)]
    pub acknowledged_by: BTreeSet<Fingerprint>,
}

impl QueuedMessage {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// On-disk form of the queue
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueSnapshot {
    messages: Vec<QueuedMessage>,
    #[serde(default)]
    recipients: BTreeMap<SessionId, BTreeSet<Fingerprint>>,
}

/// Queue limits
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub message_ttl: Duration,
    pub dedup_window: Duration,
}

impl QueueSettings {
    #[must_use]
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            message_ttl: config.message_ttl,
            dedup_window: config.dedup_window,
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Outbox with dedup, ordering and acknowledgment tracking
#[derive(Debug)]
pub struct DeliveryQueue {
    settings: QueueSettings,
    messages: HashMap<SessionId, VecDeque<QueuedMessage>>,
    recipients: HashMap<SessionId, BTreeSet<Fingerprint>>,
    snapshot: SnapshotFile<QueueSnapshot>,
}

impl DeliveryQueue {
    pub fn new(settings: QueueSettings, path: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            messages: HashMap::new(),
            recipients: HashMap::new(),
            snapshot: SnapshotFile::new(path),
        }
    }

    /// Total queued messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.values().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued messages for one session
    #[must_use]
    pub fn len_for(&self, session_id: &SessionId) -> usize {
        self.messages.get(session_id).map_or(0, VecDeque::len)
    }

    /// Enqueue `payload` for `session_id`
    ///
    /// Returns `None` when an identical payload was enqueued for the same
    /// session within the dedup window.
    pub fn enqueue(&mut self, session_id: &SessionId, payload: OutboundEnvelope) -> Option<MessageId> {
        self.enqueue_at(session_id, payload, Utc::now())
    }

    /// [`Self::enqueue`] with an explicit clock
    pub fn enqueue_at(
        &mut self,
        session_id: &SessionId,
        mut payload: OutboundEnvelope,
        now: DateTime<Utc>,
    ) -> Option<MessageId> {
        let hash = content_hash(&payload);
        let window = chrono_duration(self.settings.dedup_window);
        let queue = self.messages.entry(session_id.clone()).or_default();

        if queue
            .iter()
            .any(|m| m.content_hash == hash && now.signed_duration_since(m.enqueued_at) < window)
        {
            log::debug!("[{}] Duplicate '{}' suppressed", session_id, payload.kind);
            return None;
        }

        let id = MessageId::generate();
        payload.message_id = Some(id.clone());
        log::debug!("[{}] Queued '{}' as {}", session_id, payload.kind, id);
        queue.push_back(QueuedMessage {
            id: id.clone(),
            session_id: session_id.clone(),
            payload,
            content_hash: hash,
            enqueued_at: now,
            expires_at: now + chrono_duration(self.settings.message_ttl),
            delivered_to: BTreeSet::new(),
            acknowledged_by: BTreeSet::new(),
        });
        Some(id)
    }

    /// Record that `fingerprint` is attached to `session_id`
    ///
    /// Returns true the first time the recipient is seen for the session.
    pub fn register_recipient(&mut self, session_id: &SessionId, fingerprint: &Fingerprint) -> bool {
        self.recipients
            .entry(session_id.clone())
            .or_default()
            .insert(fingerprint.clone())
    }

    /// Unexpired messages `fingerprint` has not acknowledged, in enqueue order
    #[must_use]
    pub fn pending_for(
        &self,
        session_id: &SessionId,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Vec<OutboundEnvelope> {
        self.messages
            .get(session_id)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|m| !m.is_expired(now) && !m.acknowledged_by.contains(fingerprint))
                    .map(|m| m.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record a completed drain batch
    pub fn mark_delivered(
        &mut self,
        session_id: &SessionId,
        ids: &[MessageId],
        fingerprint: &Fingerprint,
    ) {
        if let Some(queue) = self.messages.get_mut(session_id) {
            for message in queue.iter_mut().filter(|m| ids.contains(&m.id)) {
                message.delivered_to.insert(fingerprint.clone());
            }
        }
    }

    /// Record acknowledgments and purge messages every recipient has acked
    ///
    /// Returns the number of messages newly acknowledged by `fingerprint`.
    pub fn acknowledge(
        &mut self,
        session_id: &SessionId,
        ids: &[MessageId],
        fingerprint: &Fingerprint,
    ) -> usize {
        self.register_recipient(session_id, fingerprint);
        let Some(queue) = self.messages.get_mut(session_id) else {
            return 0;
        };

        let mut count = 0;
        for message in queue.iter_mut().filter(|m| ids.contains(&m.id)) {
            if message.acknowledged_by.insert(fingerprint.clone()) {
                count += 1;
            }
        }

        let recipients = self.recipients.get(session_id);
        let before = queue.len();
        queue.retain(|m| recipients.is_none_or(|r| !r.is_subset(&m.acknowledged_by)));
        let purged = before - queue.len();
        if purged > 0 {
            log::debug!("[{}] Purged {} acknowledged messages", session_id, purged);
        }
        if queue.is_empty() {
            self.messages.remove(session_id);
        }
        count
    }

    /// Drop expired messages; returns how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut purged = 0;
        self.messages.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|m| !m.is_expired(now));
            purged += before - queue.len();
            !queue.is_empty()
        });
        if purged > 0 {
            log::info!("Purged {} expired queued messages", purged);
        }
        purged
    }

    /// Write the queue to disk
    ///
    /// # Errors
    /// Returns `CompanionError::Persistence` on disk failure
    pub async fn persist(&self) -> Result<()> {
        let mut messages: Vec<QueuedMessage> =
            self.messages.values().flat_map(|q| q.iter().cloned()).collect();
        messages.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        let snapshot = QueueSnapshot {
            messages,
            recipients: self
                .recipients
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        self.snapshot.save(&snapshot).await
    }

    /// Replace in-memory state with the persisted queue
    ///
    /// Returns the number of unexpired messages loaded.
    ///
    /// # Errors
    /// Returns `CompanionError::Persistence` when files exist but none parses
    pub async fn load(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let Some(snapshot) = self.snapshot.load().await? else {
            return Ok(0);
        };
        self.messages.clear();
        self.recipients = snapshot.recipients.into_iter().collect();

        let mut messages = snapshot.messages;
        messages.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        let mut loaded = 0;
        for message in messages.into_iter().filter(|m| !m.is_expired(now)) {
            self.messages
                .entry(message.session_id.clone())
                .or_default()
                .push_back(message);
            loaded += 1;
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(dir: &std::path::Path) -> DeliveryQueue {
        DeliveryQueue::new(
            QueueSettings {
                message_ttl: Duration::from_secs(3600),
                dedup_window: Duration::from_secs(5),
            },
            dir.join("delivery-queue.json"),
        )
    }

    fn result(text: &str) -> OutboundEnvelope {
        OutboundEnvelope::new("conversationResult", None, json!({"sessionId": "s", "text": text}))
    }

    #[test]
    fn dedup_is_bounded_by_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = queue(dir.path());
        let sid = SessionId::new("s");
        let t0 = Utc::now();
        assert!(q.enqueue_at(&sid, result("a"), t0).is_some());
        assert!(q.enqueue_at(&sid, result("a"), t0 + chrono::Duration::seconds(2)).is_none());
        assert!(q.enqueue_at(&sid, result("a"), t0 + chrono::Duration::seconds(6)).is_some());
        assert!(q.enqueue_at(&SessionId::new("other"), result("a"), t0).is_some());
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn purged_only_when_all_recipients_ack() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = queue(dir.path());
        let sid = SessionId::new("s");
        let phone = Fingerprint::new("phone");
        let tablet = Fingerprint::new("tablet");
        q.register_recipient(&sid, &phone);
        q.register_recipient(&sid, &tablet);
        let id = q.enqueue(&sid, result("done")).unwrap();
        let now = Utc::now();

        assert_eq!(q.pending_for(&sid, &phone, now).len(), 1);
        q.mark_delivered(&sid, std::slice::from_ref(&id), &phone);
        // delivered is not acknowledged
        assert_eq!(q.pending_for(&sid, &phone, now).len(), 1);

        assert_eq!(q.acknowledge(&sid, std::slice::from_ref(&id), &phone), 1);
        assert_eq!(q.acknowledge(&sid, std::slice::from_ref(&id), &phone), 0);
        assert!(q.pending_for(&sid, &phone, now).is_empty());
        assert_eq!(q.pending_for(&sid, &tablet, now).len(), 1);

        q.acknowledge(&sid, &[id], &tablet);
        assert_eq!(q.len_for(&sid), 0);
        let newcomer = Fingerprint::new("laptop");
        q.register_recipient(&sid, &newcomer);
        assert!(q.pending_for(&sid, &newcomer, now).is_empty());
    }

    #[test]
    fn expired_messages_are_hidden_and_purged() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = queue(dir.path());
        let sid = SessionId::new("s");
        let fp = Fingerprint::new("fp");
        let t0 = Utc::now();
        q.enqueue_at(&sid, result("old"), t0);
        let later = t0 + chrono::Duration::hours(2);
        assert!(q.pending_for(&sid, &fp, later).is_empty());
        assert_eq!(q.purge_expired(later), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn pending_preserves_enqueue_order_and_message_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = queue(dir.path());
        let sid = SessionId::new("s");
        let a = q.enqueue(&sid, result("first")).unwrap();
        let b = q.enqueue(&sid, result("second")).unwrap();
        let pending = q.pending_for(&sid, &Fingerprint::new("fp"), Utc::now());
        let ids: Vec<_> = pending.iter().filter_map(|e| e.message_id.clone()).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let sid = SessionId::new("s");
        let fp = Fingerprint::new("fp");
        let mut q = queue(dir.path());
        q.register_recipient(&sid, &fp);
        let id = q.enqueue(&sid, result("kept")).unwrap();
        q.persist().await.unwrap();

        let mut reloaded = queue(dir.path());
        assert_eq!(reloaded.load(Utc::now()).await.unwrap(), 1);
        let pending = reloaded.pending_for(&sid, &fp, Utc::now());
        assert_eq!(pending[0].message_id.as_ref(), Some(&id));
        reloaded.acknowledge(&sid, &[id], &fp);
        assert!(reloaded.is_empty());
    }
}
