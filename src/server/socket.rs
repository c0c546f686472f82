//! One WebSocket connection
//!
//! A writer task forwards the client's outbound channel to the socket and
//! sends protocol pings; the reader handles frames one at a time. Whichever
//! side ends first takes the connection down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;

use crate::connection::{ClientRegistry, ConnectionHistory};
use crate::types::envelope::OutboundEnvelope;
use crate::types::identifiers::Fingerprint;

use super::auth::POLICY_VIOLATION;
use super::handler::RequestHandler;

/// Everything a connection task needs
#[derive(Clone)]
pub(super) struct ConnectionContext {
    pub registry: Arc<ClientRegistry>,
    pub history: Arc<Mutex<ConnectionHistory>>,
    pub handler: RequestHandler,
    pub heartbeat_interval: Duration,
}

/// Close a socket that failed the token check
pub(super) async fn reject_unauthorized(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: POLICY_VIOLATION,
        reason: "Unauthorized".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        log::debug!("Failed to send policy close: {}", e);
    }
}

/// Serve an authenticated connection until either side closes it
pub(super) async fn handle_socket(socket: WebSocket, ctx: ConnectionContext, fingerprint: Fingerprint) {
    let registration = ctx.registry.register(fingerprint.clone());
    let client_id = registration.client_id.clone();

    let previous = ctx.history.lock().check_reconnect(&fingerprint, Instant::now());
    match &previous {
        Some(entry) => log::info!(
            "Client {} connected (probable reconnect of {}, {} session(s))",
            client_id,
            entry.last_client_id,
            entry.session_ids.len()
        ),
        None => log::info!("Client {} connected", client_id),
    }

    let welcome = OutboundEnvelope::new(
        "welcome",
        None,
        json!({
            "clientId": client_id,
            "fingerprint": fingerprint,
            "probableReconnect": previous.is_some(),
            "previousSessions": previous
                .as_ref()
                .map(|entry| entry.session_ids.iter().cloned().collect::<Vec<_>>())
                .unwrap_or_default(),
        }),
    );
    ctx.registry.send_to(&client_id, welcome.to_text());

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outbound = registration.outbound;
    let closed = registration.closed;
    let heartbeat = ctx.heartbeat_interval;

    let writer_id = client_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        ping.tick().await;

        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    log::trace!("Sent ping to client {}", writer_id);
                }
                () = closed.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_id = client_id.clone();
    let reader_registry = Arc::clone(&ctx.registry);
    let handler = ctx.handler.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                Message::Text(text) => {
                    for reply in handler.handle(&reader_id, text.as_str()).await {
                        reader_registry.send_to(&reader_id, reply.to_text());
                    }
                }
                Message::Pong(_) => reader_registry.record_pong(&reader_id),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Binary(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Some(client) = ctx.registry.unregister(&client_id) {
        log::info!(
            "Client {} disconnected ({} attached session(s))",
            client_id,
            client.attached_sessions.len()
        );
        ctx.history.lock().record_disconnect(
            client.fingerprint,
            client.id,
            client.attached_sessions,
            Instant::now(),
        );
    }
}
