//! Client wire envelopes
//!
//! Inbound: `{type, requestId, data}`. Outbound: `{type, requestId, timestamp, data}`
//! with an extra `messageId` on deliveries drained from the queue.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::identifiers::{MessageId, SessionId};
use crate::error::{CompanionError, Result};

// ============================================================================
// Inbound
// ============================================================================

/// Raw inbound envelope as received from the client
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Client-chosen correlation id echoed on the reply
    #[serde(default)]
    pub request_id: Option<String>,
    /// Type-specific payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of `ask` and `streamStart`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Prompt for the agent
    pub prompt: String,
    /// Working directory the agent is bound to
    pub working_directory: String,
    /// Existing session to continue
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Ask the agent to skip confirmations (honoured only when enabled server-side)
    #[serde(default)]
    pub skip_permissions: bool,
    /// Override of the bounded wait for `ask`, in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Payload of `streamSend`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Target session
    pub session_id: SessionId,
    /// Follow-up prompt
    pub prompt: String,
}

/// Payload of requests that only name a session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    /// Target session
    pub session_id: SessionId,
}

/// Payload of `permission`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    /// Target session
    pub session_id: SessionId,
    /// Whether the user approved the action
    pub approved: bool,
}

/// Payload of `subscribe`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Session to attach to, if any
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Outbound types wanted; empty means all
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// Payload of `ack`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    /// Session the messages belong to
    pub session_id: SessionId,
    /// Acknowledged queued message ids
    pub message_ids: Vec<MessageId>,
}

/// Typed inbound request
#[derive(Debug, Clone)]
pub enum InboundRequest {
    /// One-shot request that waits for the terminal response
    Ask(StartRequest),
    /// Start a streaming session
    StreamStart(StartRequest),
    /// Send a follow-up prompt to a streaming session
    StreamSend(SendRequest),
    /// Close a session
    StreamClose(SessionRef),
    /// Answer a permission prompt
    Permission(PermissionResponse),
    /// Attach and filter outbound event types
    Subscribe(SubscribeRequest),
    /// Application-level liveness check
    Ping,
    /// Acknowledge queued deliveries
    Ack(AckRequest),
    /// Attach to an existing session and drain its queue
    Attach(SessionRef),
    /// Mark a session as backgrounded
    Background(SessionRef),
    /// Mark a session as foregrounded
    Foreground(SessionRef),
    /// List known sessions
    ListSessions,
}

fn payload<T: DeserializeOwned>(kind: &str, data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| CompanionError::protocol(format!("Invalid '{kind}' payload: {e}")))
}

impl InboundRequest {
    /// Parse a raw text frame into an envelope and typed request
    ///
    /// # Errors
    /// Returns `CompanionError::Protocol` for malformed JSON, unknown types or
    /// invalid payloads. The request id is returned whenever it could be read.
    pub fn parse(text: &str) -> std::result::Result<(Option<String>, Self), (Option<String>, CompanionError)> {
        let envelope: InboundEnvelope = serde_json::from_str(text)
            .map_err(|e| (None, CompanionError::protocol(format!("Malformed message: {e}"))))?;
        let request_id = envelope.request_id.clone();
        Self::from_envelope(envelope)
            .map(|req| (request_id.clone(), req))
            .map_err(|e| (request_id, e))
    }

    /// Convert an envelope into a typed request
    ///
    /// # Errors
    /// Returns `CompanionError::Protocol` for unknown types or invalid payloads
    pub fn from_envelope(envelope: InboundEnvelope) -> Result<Self> {
        let InboundEnvelope { kind, data, .. } = envelope;
        let data = if data.is_null() {
            serde_json::json!({})
        } else {
            data
        };
        let request = match kind.as_str() {
            "ask" => Self::Ask(payload(&kind, data)?),
            "streamStart" => Self::StreamStart(payload(&kind, data)?),
            "streamSend" => Self::StreamSend(payload(&kind, data)?),
            "streamClose" => Self::StreamClose(payload(&kind, data)?),
            "permission" => Self::Permission(payload(&kind, data)?),
            "subscribe" => Self::Subscribe(payload(&kind, data)?),
            "ping" => Self::Ping,
            "ack" => Self::Ack(payload(&kind, data)?),
            "attach" => Self::Attach(payload(&kind, data)?),
            "background" => Self::Background(payload(&kind, data)?),
            "foreground" => Self::Foreground(payload(&kind, data)?),
            "listSessions" => Self::ListSessions,
            other => {
                return Err(CompanionError::protocol(format!(
                    "Unknown message type: {other}"
                )));
            }
        };
        Ok(request)
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Envelope sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Correlation id of the request this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// When the envelope was produced
    pub timestamp: DateTime<Utc>,
    /// Queue id, present only on queued deliveries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Type-specific payload
    pub data: serde_json::Value,
}

impl OutboundEnvelope {
    /// Build an envelope stamped with the current time
    pub fn new(kind: impl Into<String>, request_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            request_id,
            timestamp: Utc::now(),
            message_id: None,
            data,
        }
    }

    /// `error` envelope for a failed request
    #[must_use]
    pub fn error(request_id: Option<String>, err: &CompanionError) -> Self {
        Self::new(
            "error",
            request_id,
            serde_json::json!({"code": err.code(), "message": err.to_string()}),
        )
    }

    /// `pong` reply
    #[must_use]
    pub fn pong(request_id: Option<String>) -> Self {
        Self::new("pong", request_id, serde_json::json!({}))
    }

    /// Serialize to a text frame
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("Failed to serialize outbound envelope '{}': {}", self.kind, e);
            String::from("{}")
        })
    }
}
