//! Paced delivery of queued messages to a reconnected client

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::connection::ClientRegistry;
use crate::types::envelope::OutboundEnvelope;
use crate::types::identifiers::{ClientId, Fingerprint, MessageId, SessionId};

use super::commands::BrokerCommand;

/// Send `pending` to one client in order, `spacing` apart
///
/// Stops at the first failed send. Live events held for the client while
/// the drain ran are released afterwards. The messages that went out are
/// reported back to the loop as one `MarkDelivered` batch.
pub(super) fn spawn_drain(
    registry: Arc<ClientRegistry>,
    command_tx: mpsc::WeakSender<BrokerCommand>,
    client_id: ClientId,
    session_id: SessionId,
    fingerprint: Fingerprint,
    pending: Vec<OutboundEnvelope>,
    spacing: Duration,
) {
    tokio::spawn(async move {
        let total = pending.len();
        let mut sent: Vec<MessageId> = Vec::with_capacity(total);

        for (index, envelope) in pending.into_iter().enumerate() {
            if index > 0 && !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }
            if !registry.send_to(&client_id, envelope.to_text()) {
                log::debug!(
                    "[{}] Drain to client {} stopped after {} of {}",
                    session_id,
                    client_id,
                    sent.len(),
                    total
                );
                break;
            }
            if let Some(id) = envelope.message_id {
                sent.push(id);
            }
        }

        registry.release(&client_id, &session_id);

        if sent.is_empty() {
            return;
        }
        if let Some(tx) = command_tx.upgrade() {
            let _ = tx
                .send(BrokerCommand::MarkDelivered {
                    session_id,
                    ids: sent,
                    fingerprint,
                })
                .await;
        }
    });
}
