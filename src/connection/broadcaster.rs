//! Fan-out of broker events to attached clients

use std::sync::Arc;

use crate::types::envelope::OutboundEnvelope;
use crate::types::identifiers::{ClientId, SessionId};

use super::registry::ClientRegistry;

/// Result of one fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to these clients
    Delivered(Vec<ClientId>),
    /// Clients are attached but none subscribed to this type
    Filtered,
    /// Nobody received it; the caller should queue it
    Undelivered,
}

/// Pushes envelopes to the clients attached to a session
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Send `envelope` to every attached client subscribed to its type
    pub fn deliver(&self, session_id: &SessionId, envelope: &OutboundEnvelope) -> Delivery {
        let (wanted, attached) = self.registry.recipients(session_id, &envelope.kind);
        if attached > 0 && wanted.is_empty() {
            return Delivery::Filtered;
        }

        let text = envelope.to_text();
        let delivered: Vec<ClientId> = wanted
            .into_iter()
            .filter(|id| self.registry.send_live(id, session_id, text.clone()))
            .collect();

        if delivered.is_empty() {
            Delivery::Undelivered
        } else {
            log::debug!(
                "[{}] '{}' delivered to {} client(s)",
                session_id,
                envelope.kind,
                delivered.len()
            );
            Delivery::Delivered(delivered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::identifiers::Fingerprint;
    use serde_json::json;

    #[tokio::test]
    async fn unattached_session_is_undelivered() {
        let registry = Arc::new(ClientRegistry::new(8));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let _reg = registry.register(Fingerprint::new("a"));
        let env = OutboundEnvelope::new("assistantMessage", None, json!({"content": "hi"}));
        assert_eq!(
            broadcaster.deliver(&SessionId::new("s"), &env),
            Delivery::Undelivered
        );
    }

    #[tokio::test]
    async fn attached_client_receives_frame() {
        let registry = Arc::new(ClientRegistry::new(8));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let mut reg = registry.register(Fingerprint::new("a"));
        let session = SessionId::new("s");
        registry.attach(&reg.client_id, &session);

        let env = OutboundEnvelope::new("assistantMessage", None, json!({"content": "hi"}));
        assert_eq!(
            broadcaster.deliver(&session, &env),
            Delivery::Delivered(vec![reg.client_id.clone()])
        );
        let frame: serde_json::Value =
            serde_json::from_str(&reg.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "assistantMessage");

        registry.subscribe(&reg.client_id, &["conversationResult".to_string()]);
        assert_eq!(broadcaster.deliver(&session, &env), Delivery::Filtered);
    }
}
