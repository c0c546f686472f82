//! Registry of connected clients

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::identifiers::{ClientId, Fingerprint, SessionId};

use super::client::ClientConnection;

/// Handle returned when a client registers
#[derive(Debug)]
pub struct Registration {
    pub client_id: ClientId,
    /// Frames to write to the socket
    pub outbound: mpsc::Receiver<String>,
    /// Cancelled when the broker force-closes the connection
    pub closed: CancellationToken,
}

/// All connected WebSocket clients
///
/// Shared between socket tasks and the broker loop.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, ClientConnection>,
    max_send_queue: usize,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client with its reconnection fingerprint
    pub fn register(&self, fingerprint: Fingerprint) -> Registration {
        let client_id = ClientId::generate();
        let (tx, outbound) = mpsc::channel(self.max_send_queue);
        let closed = CancellationToken::new();
        self.clients.insert(
            client_id.clone(),
            ClientConnection::new(client_id.clone(), fingerprint, tx, closed.clone()),
        );
        Registration {
            client_id,
            outbound,
            closed,
        }
    }

    /// Remove a client; returns its state if it was registered
    pub fn unregister(&self, client_id: &ClientId) -> Option<ClientConnection> {
        self.clients.remove(client_id).map(|(_, client)| client)
    }

    /// Force-close a client's socket
    pub fn close(&self, client_id: &ClientId) {
        if let Some(client) = self.clients.get(client_id) {
            client.closer.cancel();
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    #[must_use]
    pub fn fingerprint(&self, client_id: &ClientId) -> Option<Fingerprint> {
        self.clients.get(client_id).map(|c| c.fingerprint.clone())
    }

    /// Sessions the client is attached to
    #[must_use]
    pub fn attached_sessions(&self, client_id: &ClientId) -> HashSet<SessionId> {
        self.clients
            .get(client_id)
            .map(|c| c.attached_sessions.clone())
            .unwrap_or_default()
    }

    /// Attach a client to a session; returns its fingerprint
    pub fn attach(&self, client_id: &ClientId, session_id: &SessionId) -> Option<Fingerprint> {
        let mut client = self.clients.get_mut(client_id)?;
        client.attached_sessions.insert(session_id.clone());
        Some(client.fingerprint.clone())
    }

    /// Attach a client and park live frames for the session behind a drain
    ///
    /// Frames sent through [`Self::send_live`] are held until the matching
    /// [`Self::release`], so they never overtake older queued messages.
    pub fn attach_holding(
        &self,
        client_id: &ClientId,
        session_id: &SessionId,
    ) -> Option<Fingerprint> {
        let mut client = self.clients.get_mut(client_id)?;
        client.attached_sessions.insert(session_id.clone());
        client.held.entry(session_id.clone()).or_default().drains += 1;
        Some(client.fingerprint.clone())
    }

    /// End one drain; once none remain the held frames go out in order
    ///
    /// Returns false if the client is gone or a held frame could not be sent.
    pub fn release(&self, client_id: &ClientId, session_id: &SessionId) -> bool {
        let Some(mut client) = self.clients.get_mut(client_id) else {
            return false;
        };
        let Some(held) = client.held.get_mut(session_id) else {
            return true;
        };
        held.drains = held.drains.saturating_sub(1);
        if held.drains > 0 {
            return true;
        }
        let frames = client
            .held
            .remove(session_id)
            .map(|h| h.frames)
            .unwrap_or_default();
        let mut ok = true;
        for frame in frames {
            ok &= client.push(frame);
        }
        ok
    }

    /// Detach every client from a session
    pub fn detach_all(&self, session_id: &SessionId) {
        for mut client in self.clients.iter_mut() {
            client.attached_sessions.remove(session_id);
        }
    }

    /// Restrict the event types pushed to a client; empty means all
    pub fn subscribe(&self, client_id: &ClientId, event_types: &[String]) -> bool {
        match self.clients.get_mut(client_id) {
            Some(mut client) => {
                client.subscribed_types = event_types.iter().cloned().collect();
                true
            }
            None => false,
        }
    }

    /// Record inbound traffic
    pub fn touch(&self, client_id: &ClientId) {
        if let Some(mut client) = self.clients.get_mut(client_id) {
            client.last_activity = Instant::now();
        }
    }

    /// Record a heartbeat answer
    pub fn record_pong(&self, client_id: &ClientId) {
        if let Some(mut client) = self.clients.get_mut(client_id) {
            let now = Instant::now();
            client.last_pong = now;
            client.last_activity = now;
        }
    }

    /// Attached clients that are subscribed to `kind`
    ///
    /// The second value is the number of attached clients regardless of
    /// subscription.
    #[must_use]
    pub fn recipients(&self, session_id: &SessionId, kind: &str) -> (Vec<ClientId>, usize) {
        let mut attached = 0;
        let mut wanted = Vec::new();
        for client in self.clients.iter() {
            if client.attached_sessions.contains(session_id) {
                attached += 1;
                if client.wants(kind) {
                    wanted.push(client.id.clone());
                }
            }
        }
        (wanted, attached)
    }

    /// Queue a frame for one client; false if it is gone or its queue is full
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|client| client.push(message))
    }

    /// Send a live session event, parking it while a drain is in flight
    pub fn send_live(&self, client_id: &ClientId, session_id: &SessionId, message: String) -> bool {
        let Some(mut client) = self.clients.get_mut(client_id) else {
            return false;
        };
        if let Some(held) = client.held.get_mut(session_id) {
            held.frames.push(message);
            return true;
        }
        client.push(message)
    }

    /// Clients that have not answered a heartbeat within `timeout`
    #[must_use]
    pub fn unresponsive(&self, timeout: Duration) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|c| !c.is_alive(timeout))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Force-close every client
    pub fn close_all(&self) {
        for client in self.clients.iter() {
            client.closer.cancel();
        }
    }
}
