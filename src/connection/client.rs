//! One connected client

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::identifiers::{ClientId, Fingerprint, SessionId};

/// Live frames parked behind queue drains in flight for one session
#[derive(Debug, Default)]
pub(super) struct HeldFrames {
    pub drains: usize,
    pub frames: Vec<String>,
}

/// A connected WebSocket client
///
/// Ephemeral: dropped on disconnect. Its fingerprint outlives it in the
/// connection history.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    pub fingerprint: Fingerprint,
    pub(super) tx: mpsc::Sender<String>,
    /// Outbound event types this client wants; empty means all
    pub subscribed_types: HashSet<String>,
    /// Sessions whose events are pushed to this client
    pub attached_sessions: HashSet<SessionId>,
    pub(super) held: HashMap<SessionId, HeldFrames>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub(super) last_pong: Instant,
    pub(super) closer: CancellationToken,
}

impl ClientConnection {
    pub(super) fn new(
        id: ClientId,
        fingerprint: Fingerprint,
        tx: mpsc::Sender<String>,
        closer: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            fingerprint,
            tx,
            subscribed_types: HashSet::new(),
            attached_sessions: HashSet::new(),
            held: HashMap::new(),
            connected_at: Utc::now(),
            last_activity: now,
            last_pong: now,
            closer,
        }
    }

    /// Whether this client wants events of `kind`
    #[must_use]
    pub fn wants(&self, kind: &str) -> bool {
        self.subscribed_types.is_empty() || self.subscribed_types.contains(kind)
    }

    /// Queue a frame on the socket; false if it is gone or its queue is full
    pub(super) fn push(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                log::warn!(
                    "Send queue full for client {}, dropping {} bytes",
                    self.id,
                    msg.len()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Whether a pong arrived within `timeout`
    #[must_use]
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_pong.elapsed() < timeout
    }
}
