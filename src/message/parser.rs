//! Message parser for agent stream-json output

use serde::Deserialize;

use crate::error::Result;
use crate::types::messages::{AgentMessage, KNOWN_MESSAGE_TYPES};

/// Parse a decoded JSON value into a typed agent message
///
/// # Returns
/// `Ok(None)` when the value is not an object or its `type` is outside the
/// vocabulary the broker interprets; such values are skipped, not errors.
///
/// # Errors
/// Returns `CompanionError::Json` when a known message type has an invalid shape
pub fn parse_message(data: &serde_json::Value) -> Result<Option<AgentMessage>> {
    let Some(kind) = data.get("type").and_then(|t| t.as_str()) else {
        return Ok(None);
    };
    if !KNOWN_MESSAGE_TYPES.contains(&kind) {
        return Ok(None);
    }
    Ok(Some(AgentMessage::deserialize(data)?))
}
