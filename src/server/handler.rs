//! Inbound request dispatch
//!
//! Parses one text frame, forwards it to the broker and builds the reply
//! envelopes. Requests from one client are handled in arrival order.

use std::sync::Arc;

use serde_json::json;

use crate::broker::{AskOutcome, BrokerHandle};
use crate::connection::ClientRegistry;
use crate::error::{CompanionError, Result};
use crate::types::envelope::{InboundRequest, OutboundEnvelope, StartRequest, SubscribeRequest};
use crate::types::events::BrokerEvent;
use crate::types::identifiers::ClientId;

/// Turns client frames into broker commands
#[derive(Clone)]
pub struct RequestHandler {
    broker: BrokerHandle,
    registry: Arc<ClientRegistry>,
}

impl RequestHandler {
    #[must_use]
    pub fn new(broker: BrokerHandle, registry: Arc<ClientRegistry>) -> Self {
        Self { broker, registry }
    }

    /// Handle one inbound frame and return the immediate replies
    ///
    /// `ask` replies arrive later: the wait runs on its own task and the
    /// `conversationResult` (or `error`) is sent straight to the client.
    pub async fn handle(&self, client_id: &ClientId, text: &str) -> Vec<OutboundEnvelope> {
        self.registry.touch(client_id);

        let (request_id, request) = match InboundRequest::parse(text) {
            Ok(parsed) => parsed,
            Err((request_id, e)) => {
                log::debug!("Rejected frame from client {}: {}", client_id, e);
                return vec![OutboundEnvelope::error(request_id, &e)];
            }
        };

        match self.dispatch(client_id, request_id.clone(), request).await {
            Ok(replies) => replies,
            Err(e) => {
                log::debug!("Request from client {} failed: {}", client_id, e);
                vec![OutboundEnvelope::error(request_id, &e)]
            }
        }
    }

    async fn dispatch(
        &self,
        client_id: &ClientId,
        request_id: Option<String>,
        request: InboundRequest,
    ) -> Result<Vec<OutboundEnvelope>> {
        let reply = |kind: &str, data: serde_json::Value| {
            vec![OutboundEnvelope::new(kind, request_id.clone(), data)]
        };

        match request {
            InboundRequest::Ping => Ok(vec![OutboundEnvelope::pong(request_id.clone())]),
            InboundRequest::Ask(start) => {
                self.spawn_ask(client_id.clone(), request_id.clone(), start);
                Ok(Vec::new())
            }
            InboundRequest::StreamStart(start) => {
                let started = self.broker.start_stream(client_id.clone(), start).await?;
                Ok(reply("streamStarted", serde_json::to_value(started)?))
            }
            InboundRequest::StreamSend(send) => {
                let session_id = send.session_id.clone();
                self.broker.send(Some(client_id.clone()), send).await?;
                Ok(reply("streamSent", json!({"sessionId": session_id})))
            }
            InboundRequest::StreamClose(target) => {
                self.broker.close(target.session_id.clone()).await?;
                Ok(reply("streamClosed", json!({"sessionId": target.session_id})))
            }
            InboundRequest::Permission(response) => {
                let session_id = response.session_id.clone();
                let approved = response.approved;
                self.broker.permission(response).await?;
                Ok(reply(
                    "permissionAccepted",
                    json!({"sessionId": session_id, "approved": approved}),
                ))
            }
            InboundRequest::Subscribe(subscribe) => self.subscribe(client_id, request_id.clone(), subscribe).await,
            InboundRequest::Attach(target) => {
                let queued = self.broker.attach(client_id.clone(), target.session_id.clone()).await?;
                Ok(reply(
                    "attached",
                    json!({"sessionId": target.session_id, "queued": queued}),
                ))
            }
            InboundRequest::Ack(ack) => {
                let session_id = ack.session_id.clone();
                let count = self.broker.ack(client_id.clone(), ack).await?;
                Ok(reply(
                    "acknowledged",
                    json!({"sessionId": session_id, "count": count}),
                ))
            }
            InboundRequest::Background(target) => {
                self.broker.set_background(target.session_id.clone(), true).await?;
                Ok(reply("sessionBackgrounded", json!({"sessionId": target.session_id})))
            }
            InboundRequest::Foreground(target) => {
                self.broker.set_background(target.session_id.clone(), false).await?;
                Ok(reply("sessionForegrounded", json!({"sessionId": target.session_id})))
            }
            InboundRequest::ListSessions => {
                let sessions = self.broker.list_sessions().await?;
                Ok(reply("sessionList", json!({"sessions": sessions})))
            }
        }
    }

    async fn subscribe(
        &self,
        client_id: &ClientId,
        request_id: Option<String>,
        subscribe: SubscribeRequest,
    ) -> Result<Vec<OutboundEnvelope>> {
        if !self.registry.subscribe(client_id, &subscribe.event_types) {
            return Err(CompanionError::transport("Client is no longer connected"));
        }
        let queued = match &subscribe.session_id {
            Some(session_id) => Some(self.broker.attach(client_id.clone(), session_id.clone()).await?),
            None => None,
        };
        Ok(vec![OutboundEnvelope::new(
            "subscribed",
            request_id,
            json!({
                "sessionId": subscribe.session_id,
                "eventTypes": subscribe.event_types,
                "queued": queued,
            }),
        )])
    }

    fn spawn_ask(&self, client_id: ClientId, request_id: Option<String>, start: StartRequest) {
        let broker = self.broker.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            match broker.ask(Some(client_id.clone()), start).await {
                Ok(AskOutcome { session_id, result }) => {
                    let mut envelope = BrokerEvent::Result {
                        session_id: session_id.clone(),
                        result,
                    }
                    .to_envelope();
                    envelope.request_id = request_id;
                    if !registry.send_to(&client_id, envelope.to_text()) {
                        log::debug!(
                            "[{}] Client {} left before its ask completed",
                            session_id,
                            client_id
                        );
                        if let Err(e) = broker.requeue(session_id, envelope).await {
                            log::warn!("Ask result for client {} lost: {}", client_id, e);
                        }
                    }
                }
                Err(e) => {
                    let envelope = OutboundEnvelope::error(request_id, &e);
                    if !registry.send_to(&client_id, envelope.to_text()) {
                        log::debug!("Client {} left before its ask failed: {}", client_id, e);
                    }
                }
            }
        });
    }
}

