//! Reconnection correlation
//!
//! Remembers recently dropped connections by fingerprint so a new connection
//! from the same device can be flagged as a probable reconnect. Used for
//! logging only; it grants nothing.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::types::identifiers::{ClientId, Fingerprint, SessionId};

/// A dropped connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHistoryEntry {
    pub fingerprint: Fingerprint,
    pub last_client_id: ClientId,
    pub session_ids: BTreeSet<SessionId>,
    pub last_seen_at: Instant,
}

/// Bounded-recency table of dropped connections
#[derive(Debug)]
pub struct ConnectionHistory {
    window: Duration,
    entries: HashMap<Fingerprint, ConnectionHistoryEntry>,
}

impl ConnectionHistory {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remember a dropped connection
    pub fn record_disconnect(
        &mut self,
        fingerprint: Fingerprint,
        client_id: ClientId,
        session_ids: impl IntoIterator<Item = SessionId>,
        now: Instant,
    ) {
        self.prune(now);
        self.entries.insert(
            fingerprint.clone(),
            ConnectionHistoryEntry {
                fingerprint,
                last_client_id: client_id,
                session_ids: session_ids.into_iter().collect(),
                last_seen_at: now,
            },
        );
    }

    /// Match a new connection against recent drops
    ///
    /// Returns the entry when the fingerprint dropped within the window.
    pub fn check_reconnect(
        &mut self,
        fingerprint: &Fingerprint,
        now: Instant,
    ) -> Option<ConnectionHistoryEntry> {
        self.prune(now);
        let entry = self.entries.get(fingerprint)?;
        if now.saturating_duration_since(entry.last_seen_at) <= self.window {
            self.entries.remove(fingerprint)
        } else {
            None
        }
    }

    /// Drop entries older than twice the window
    pub fn prune(&mut self, now: Instant) {
        let horizon = self.window * 2;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_seen_at) <= horizon);
    }
}
