//! Agent stream-json message types
//!
//! These mirror the subset of the Claude Code `stream-json` vocabulary the
//! broker needs in order to classify output. Fields the broker does not use
//! are either defaulted or captured as raw JSON.

use serde::{Deserialize, Serialize};

// ============================================================================
// Content Blocks
// ============================================================================

/// Content value for tool results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
    /// String content
    String(String),
    /// Structured content blocks
    Blocks(Vec<serde_json::Value>),
}

/// Content block types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content block
    Text {
        /// Text content
        text: String,
    },
    /// Thinking content block (extended thinking)
    Thinking {
        /// Thinking content
        thinking: String,
        /// Signature for verification
        #[serde(default)]
        signature: String,
    },
    /// Tool use request
    ToolUse {
        /// Tool use ID
        id: String,
        /// Tool name
        name: String,
        /// Tool input parameters
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Tool execution result
    ToolResult {
        /// ID of the tool use this is a result for
        tool_use_id: String,
        /// Result content
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ContentValue>,
        /// Whether this is an error result
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Any block type the broker does not interpret (images, redacted thinking)
    #[serde(other)]
    Unknown,
}

/// User message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageContent {
    /// Message role (always "user")
    #[serde(default)]
    pub role: String,
    /// Message content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<UserContent>,
}

/// User content can be string or blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Plain string content
    String(String),
    /// Structured content blocks
    Blocks(Vec<ContentBlock>),
}

/// Assistant message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageContent {
    /// Model that generated the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Message content blocks
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

// ============================================================================
// Agent Messages
// ============================================================================

/// Top-level message emitted by the agent on stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// User message (tool-result echo)
    User {
        /// Parent tool use ID for nested conversations
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Message content
        message: UserMessageContent,
        /// Agent conversation id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Assistant message
    Assistant {
        /// Parent tool use ID for nested conversations
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Message content
        message: AssistantMessageContent,
        /// Agent conversation id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// System message
    System {
        /// System message subtype
        subtype: String,
        /// Additional system message data
        #[serde(flatten)]
        data: serde_json::Value,
    },
    /// Terminal result message with metrics
    Result {
        /// Result subtype
        #[serde(default)]
        subtype: String,
        /// Total duration in milliseconds
        #[serde(default)]
        duration_ms: u64,
        /// API call duration in milliseconds
        #[serde(default)]
        duration_api_ms: u64,
        /// Whether this is an error result
        #[serde(default)]
        is_error: bool,
        /// Number of conversation turns
        #[serde(default)]
        num_turns: u32,
        /// Agent conversation id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Total cost in USD
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
        /// Token usage statistics
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<serde_json::Value>,
        /// Result message
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// Error reported by the agent itself
    Error {
        /// Raw error payload
        #[serde(flatten)]
        data: serde_json::Value,
    },
}

/// Message types the broker understands; anything else is skipped
pub const KNOWN_MESSAGE_TYPES: &[&str] = &["user", "assistant", "system", "result", "error"];

impl AgentMessage {
    /// Agent conversation id carried by this message, if any
    #[must_use]
    pub fn agent_session_id(&self) -> Option<&str> {
        match self {
            Self::User { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::Result { session_id, .. } => session_id.as_deref(),
            Self::System { data, .. } => data.get("session_id").and_then(|v| v.as_str()),
            Self::Error { .. } => None,
        }
    }
}

/// Extract a human-readable message from an agent `error` payload
#[must_use]
pub fn error_text(data: &serde_json::Value) -> String {
    data.get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .or_else(|| data.get("message"))
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "Agent reported an error".to_string())
}

/// Build the stdin line that submits a user turn in `stream-json` input mode
#[must_use]
pub fn user_turn_line(prompt: &str) -> String {
    let mut line = serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": prompt,
        }
    })
    .to_string();
    line.push('\n');
    line
}
