//! Per-session accumulation state for classifier output

use serde::{Deserialize, Serialize};

/// Metadata recorded from the agent's `system/init` message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInitRecord {
    /// Agent conversation id
    pub agent_session_id: Option<String>,
    /// Model in use
    pub model: Option<String>,
    /// Working directory reported by the agent
    pub cwd: Option<String>,
    /// Tools the agent advertised
    pub tools: Vec<String>,
    /// Permission mode the agent runs under
    pub permission_mode: Option<String>,
}

/// Accumulated state of the request currently in flight for one session
///
/// Owned by the session manager and only mutated through
/// [`Classifier::classify`](super::Classifier::classify).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBuffer {
    pending_assistant_messages: Vec<String>,
    tool_use_in_progress: bool,
    permission_request_sent: bool,
    deliverables: Vec<String>,
    system_init: Option<SystemInitRecord>,
    agent_session_id: Option<String>,
}

impl MessageBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer seeded with an agent conversation id (restored sessions)
    #[must_use]
    pub fn with_agent_session_id(agent_session_id: Option<String>) -> Self {
        Self {
            agent_session_id,
            ..Self::default()
        }
    }

    /// True when no assistant text is pending and no tool is running
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_assistant_messages.is_empty() && !self.tool_use_in_progress
    }

    /// Assistant text blocks buffered for the current request
    #[must_use]
    pub fn pending_assistant_messages(&self) -> &[String] {
        &self.pending_assistant_messages
    }

    /// Whether a tool invocation has not yet produced a result
    #[must_use]
    pub fn tool_use_in_progress(&self) -> bool {
        self.tool_use_in_progress
    }

    /// Whether a permission prompt was already surfaced for this request
    #[must_use]
    pub fn permission_request_sent(&self) -> bool {
        self.permission_request_sent
    }

    /// Files written or edited during the current request
    #[must_use]
    pub fn deliverables(&self) -> &[String] {
        &self.deliverables
    }

    /// Recorded `system/init` metadata
    #[must_use]
    pub fn system_init(&self) -> Option<&SystemInitRecord> {
        self.system_init.as_ref()
    }

    /// Agent conversation id, used to resume after a restart
    #[must_use]
    pub fn agent_session_id(&self) -> Option<&str> {
        self.agent_session_id.as_deref()
    }

    pub(crate) fn push_assistant_text(&mut self, text: String) {
        self.pending_assistant_messages.push(text);
    }

    pub(crate) fn set_tool_use_in_progress(&mut self, value: bool) {
        self.tool_use_in_progress = value;
    }

    pub(crate) fn mark_permission_sent(&mut self) {
        self.permission_request_sent = true;
    }

    pub(crate) fn add_deliverable(&mut self, path: String) {
        if !self.deliverables.contains(&path) {
            self.deliverables.push(path);
        }
    }

    pub(crate) fn record_init(&mut self, record: SystemInitRecord) {
        if record.agent_session_id.is_some() {
            self.agent_session_id.clone_from(&record.agent_session_id);
        }
        self.system_init = Some(record);
    }

    pub(crate) fn record_agent_session_id(&mut self, id: &str) {
        if self.agent_session_id.as_deref() != Some(id) {
            self.agent_session_id = Some(id.to_string());
        }
    }

    /// Join buffered text blocks, dropping exact repeats
    #[must_use]
    pub fn aggregated_text(&self) -> String {
        let mut seen: Vec<&str> = Vec::new();
        for text in &self.pending_assistant_messages {
            let trimmed = text.trim();
            if !trimmed.is_empty() && !seen.contains(&trimmed) {
                seen.push(trimmed);
            }
        }
        seen.join("\n\n")
    }

    /// Drop request-scoped state after a terminal response
    ///
    /// The agent conversation id and init record survive so later requests can
    /// resume the same conversation.
    pub(crate) fn take_deliverables_and_reset(&mut self) -> Vec<String> {
        self.pending_assistant_messages.clear();
        self.tool_use_in_progress = false;
        self.permission_request_sent = false;
        std::mem::take(&mut self.deliverables)
    }

    /// Drop everything, including the conversation id
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_drops_exact_repeats_in_order() {
        let mut buffer = MessageBuffer::new();
        buffer.push_assistant_text("first".into());
        buffer.push_assistant_text("second".into());
        buffer.push_assistant_text("first".into());
        buffer.push_assistant_text("  ".into());
        assert_eq!(buffer.aggregated_text(), "first\n\nsecond");
    }

    #[test]
    fn reset_keeps_conversation_id() {
        let mut buffer = MessageBuffer::with_agent_session_id(Some("abc".into()));
        buffer.push_assistant_text("x".into());
        buffer.set_tool_use_in_progress(true);
        buffer.add_deliverable("a.txt".into());
        assert!(!buffer.is_empty());

        let delivered = buffer.take_deliverables_and_reset();
        assert_eq!(delivered, vec!["a.txt".to_string()]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.agent_session_id(), Some("abc"));

        buffer.clear();
        assert_eq!(buffer.agent_session_id(), None);
    }
}
