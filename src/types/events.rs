//! Broker lifecycle and output events
//!
//! A closed set of tagged variants produced by the broker loop and consumed
//! independently by the event broadcaster and the delivery queue.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::envelope::OutboundEnvelope;
use super::identifiers::SessionId;

/// Why a session was cleaned up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    /// Client asked for the session to be closed
    UserRequested,
    /// Idle timeout, TTL expiry or age-based reconciliation
    Timeout,
    /// Agent process exited unexpectedly
    ProcessDied,
}

impl CleanupReason {
    /// Wire tag for this reason
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRequested => "user_requested",
            Self::Timeout => "timeout",
            Self::ProcessDied => "process_died",
        }
    }
}

/// Terminal response of one agent request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    /// Whether the agent reported success
    pub success: bool,
    /// Result text (aggregated assistant text in aggregate mode)
    pub text: String,
    /// Agent conversation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Number of agent turns
    pub num_turns: u32,
    /// Total cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Files the agent wrote or edited during this request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliverables: Vec<String>,
    /// Permission question embedded in the result text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_prompt: Option<String>,
}

/// Event emitted by the broker for one session
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Agent reported its `system/init` record
    Init {
        /// Broker session
        session_id: SessionId,
        /// Agent conversation id
        agent_session_id: Option<String>,
        /// Model in use
        model: Option<String>,
        /// Tools advertised by the agent
        tools: Vec<String>,
    },
    /// Assistant text surfaced in streaming mode
    Assistant {
        /// Broker session
        session_id: SessionId,
        /// Text of the assistant message
        content: String,
    },
    /// Agent invoked a tool
    ToolUse {
        /// Broker session
        session_id: SessionId,
        /// Tool use id
        tool_use_id: String,
        /// Tool name
        tool_name: String,
        /// Tool input
        input: serde_json::Value,
    },
    /// Tool finished; content is never surfaced, only the status
    ToolResult {
        /// Broker session
        session_id: SessionId,
        /// Tool use id this result belongs to
        tool_use_id: String,
        /// Whether the tool failed
        is_error: bool,
    },
    /// Terminal response for the current request
    Result {
        /// Broker session
        session_id: SessionId,
        /// Final result
        result: FinalResult,
    },
    /// Agent asked for confirmation before a risky action
    PermissionRequired {
        /// Broker session
        session_id: SessionId,
        /// The question as the agent phrased it
        prompt: String,
    },
    /// Per-request failure surfaced to the session's clients
    StreamError {
        /// Broker session
        session_id: SessionId,
        /// Stable machine-readable code
        code: String,
        /// Human-readable message
        message: String,
    },
    /// Agent process exited unexpectedly
    ProcessDied {
        /// Broker session
        session_id: SessionId,
        /// Exit code, when known
        exit_code: Option<i32>,
    },
    /// Agent process exceeded its TTL and is being terminated
    ProcessExpired {
        /// Broker session
        session_id: SessionId,
    },
    /// Agent process is nearing its TTL
    ExpiryWarning {
        /// Broker session
        session_id: SessionId,
        /// Seconds left before expiry
        remaining_secs: u64,
    },
    /// Session state was dropped
    SessionCleaned {
        /// Broker session
        session_id: SessionId,
        /// Why it was dropped
        reason: CleanupReason,
    },
}

impl BrokerEvent {
    /// Session this event belongs to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Init { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::ToolUse { session_id, .. }
            | Self::ToolResult { session_id, .. }
            | Self::Result { session_id, .. }
            | Self::PermissionRequired { session_id, .. }
            | Self::StreamError { session_id, .. }
            | Self::ProcessDied { session_id, .. }
            | Self::ProcessExpired { session_id }
            | Self::ExpiryWarning { session_id, .. }
            | Self::SessionCleaned { session_id, .. } => session_id,
        }
    }

    /// Outbound envelope type for this event
    #[must_use]
    pub fn outbound_type(&self) -> &'static str {
        match self {
            Self::Init { .. } => "systemInit",
            Self::Assistant { .. } => "assistantMessage",
            Self::ToolUse { .. } => "toolUse",
            Self::ToolResult { .. } => "toolResult",
            Self::Result { .. } => "conversationResult",
            Self::PermissionRequired { .. } => "permissionRequired",
            Self::StreamError { .. } => "streamError",
            Self::ProcessDied { .. } => "processDied",
            Self::ProcessExpired { .. } => "processExpired",
            Self::ExpiryWarning { .. } => "sessionExpiring",
            Self::SessionCleaned { .. } => "sessionClosed",
        }
    }

    /// Convert to the wire envelope sent to clients
    #[must_use]
    pub fn to_envelope(&self) -> OutboundEnvelope {
        let sid = self.session_id().as_str();
        let data = match self {
            Self::Init {
                agent_session_id,
                model,
                tools,
                ..
            } => json!({
                "sessionId": sid,
                "agentSessionId": agent_session_id,
                "model": model,
                "tools": tools,
            }),
            Self::Assistant { content, .. } => json!({"sessionId": sid, "content": content}),
            Self::ToolUse {
                tool_use_id,
                tool_name,
                input,
                ..
            } => json!({
                "sessionId": sid,
                "toolUseId": tool_use_id,
                "toolName": tool_name,
                "input": input,
            }),
            Self::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => json!({"sessionId": sid, "toolUseId": tool_use_id, "isError": is_error}),
            Self::Result { result, .. } => {
                let mut data = serde_json::to_value(result).unwrap_or_else(|_| json!({}));
                data["sessionId"] = json!(sid);
                data
            }
            Self::PermissionRequired { prompt, .. } => json!({"sessionId": sid, "prompt": prompt}),
            Self::StreamError { code, message, .. } => {
                json!({"sessionId": sid, "code": code, "message": message})
            }
            Self::ProcessDied { exit_code, .. } => json!({"sessionId": sid, "exitCode": exit_code}),
            Self::ProcessExpired { .. } => json!({"sessionId": sid}),
            Self::ExpiryWarning { remaining_secs, .. } => {
                json!({"sessionId": sid, "remainingSecs": remaining_secs})
            }
            Self::SessionCleaned { reason, .. } => {
                json!({"sessionId": sid, "reason": reason.as_str()})
            }
        };
        OutboundEnvelope::new(self.outbound_type(), None, data)
    }
}
