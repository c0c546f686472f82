//! Classification of decoded agent output into broker actions
//!
//! [`Classifier::classify`] is a pure function of the decoded value, the
//! session's [`MessageBuffer`] and the request mode; mutating the buffer is its
//! only side effect. Turning actions into client events is the caller's job.

use std::sync::Arc;

use super::buffer::{MessageBuffer, SystemInitRecord};
use super::parser::parse_message;
use super::permission::{PermissionDetector, PhraseRules};
use crate::types::events::FinalResult;
use crate::types::messages::{AgentMessage, ContentBlock, UserContent, error_text};

/// Tools whose `file_path` input marks a deliverable
const FILE_WRITING_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// How the current request surfaces output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClassifyMode {
    /// Assistant messages are streamed to clients as they arrive
    #[default]
    Streaming,
    /// Assistant text is collected and returned with the terminal response
    Aggregate,
}

/// A tool invocation found in an assistant message
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Tool use id
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool input
    pub input: serde_json::Value,
}

/// Outcome of classifying one decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyAction {
    /// Absorbed into the buffer
    Buffer,
    /// Not part of the vocabulary the broker interprets
    Skip,
    /// Assistant invoked one or more tools
    ToolUse(Vec<ToolInvocation>),
    /// Assistant asked the user for confirmation
    PermissionRequest {
        /// The question as phrased by the agent
        prompt: String,
    },
    /// Terminal response for the current request
    FinalResult(FinalResult),
    /// Agent reported an error or emitted a malformed known message
    Error {
        /// Human-readable message
        message: String,
    },
}

/// Action plus the parsed message it was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    /// The action
    pub action: ClassifyAction,
    /// Parsed message, absent for skipped or malformed values
    pub message: Option<AgentMessage>,
}

/// Maps decoded agent objects to actions
#[derive(Clone)]
pub struct Classifier {
    detector: Arc<dyn PermissionDetector>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Arc::new(PhraseRules::default()))
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier").finish_non_exhaustive()
    }
}

impl Classifier {
    /// Create a classifier using the given permission detection strategy
    #[must_use]
    pub fn new(detector: Arc<dyn PermissionDetector>) -> Self {
        Self { detector }
    }

    /// Classify one decoded value, updating `buffer`
    pub fn classify(
        &self,
        value: &serde_json::Value,
        buffer: &mut MessageBuffer,
        mode: ClassifyMode,
    ) -> Classified {
        let message = match parse_message(value) {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Classified {
                    action: ClassifyAction::Skip,
                    message: None,
                };
            }
            Err(e) => {
                return Classified {
                    action: ClassifyAction::Error {
                        message: format!("Malformed agent message: {e}"),
                    },
                    message: None,
                };
            }
        };

        let action = match &message {
            AgentMessage::System { subtype, data } => {
                if subtype == "init" {
                    buffer.record_init(init_record(data));
                    ClassifyAction::Buffer
                } else {
                    ClassifyAction::Skip
                }
            }
            AgentMessage::Assistant {
                message: content,
                session_id,
                ..
            } => {
                if let Some(id) = session_id {
                    buffer.record_agent_session_id(id);
                }
                self.classify_assistant(&content.content, buffer)
            }
            AgentMessage::User { message: content, .. } => {
                let finished_tool = match &content.content {
                    Some(UserContent::Blocks(blocks)) => blocks
                        .iter()
                        .any(|b| matches!(b, ContentBlock::ToolResult { .. })),
                    _ => false,
                };
                if finished_tool {
                    buffer.set_tool_use_in_progress(false);
                }
                ClassifyAction::Buffer
            }
            AgentMessage::Result {
                is_error,
                duration_ms,
                num_turns,
                session_id,
                total_cost_usd,
                result,
                ..
            } => {
                if let Some(id) = session_id {
                    buffer.record_agent_session_id(id);
                }
                let aggregated = buffer.aggregated_text();
                let text = match (mode, result) {
                    (ClassifyMode::Aggregate, _) if !aggregated.is_empty() => aggregated,
                    (_, Some(result)) => result.clone(),
                    (_, None) => aggregated,
                };
                let permission_prompt =
                    if mode == ClassifyMode::Aggregate && !buffer.permission_request_sent() {
                        self.detector.detect(&text)
                    } else {
                        None
                    };
                let deliverables = buffer.take_deliverables_and_reset();
                ClassifyAction::FinalResult(FinalResult {
                    success: !is_error,
                    text,
                    agent_session_id: buffer.agent_session_id().map(str::to_string),
                    duration_ms: *duration_ms,
                    num_turns: *num_turns,
                    total_cost_usd: *total_cost_usd,
                    deliverables,
                    permission_prompt,
                })
            }
            AgentMessage::Error { data } => ClassifyAction::Error {
                message: error_text(data),
            },
        };

        Classified {
            action,
            message: Some(message),
        }
    }

    fn classify_assistant(
        &self,
        blocks: &[ContentBlock],
        buffer: &mut MessageBuffer,
    ) -> ClassifyAction {
        let text = joined_text(blocks);

        if !buffer.permission_request_sent()
            && let Some(prompt) = self.detector.detect(&text)
        {
            buffer.mark_permission_sent();
            buffer.push_assistant_text(text);
            return ClassifyAction::PermissionRequest { prompt };
        }

        let invocations: Vec<ToolInvocation> = blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect();

        if !text.is_empty() {
            buffer.push_assistant_text(text);
        }

        if invocations.is_empty() {
            return ClassifyAction::Buffer;
        }

        buffer.set_tool_use_in_progress(true);
        for invocation in &invocations {
            if FILE_WRITING_TOOLS.contains(&invocation.name.as_str())
                && let Some(path) = invocation
                    .input
                    .get("file_path")
                    .or_else(|| invocation.input.get("notebook_path"))
                    .and_then(|p| p.as_str())
            {
                buffer.add_deliverable(path.to_string());
            }
        }
        ClassifyAction::ToolUse(invocations)
    }
}

/// Concatenated text blocks of an assistant message
#[must_use]
pub fn joined_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assistant text carried by a parsed message, if any
#[must_use]
pub fn assistant_text(message: &AgentMessage) -> Option<String> {
    match message {
        AgentMessage::Assistant { message, .. } => {
            let text = joined_text(&message.content);
            (!text.trim().is_empty()).then_some(text)
        }
        _ => None,
    }
}

/// Tool results echoed back in a user message: `(tool_use_id, is_error)`
#[must_use]
pub fn tool_results(message: &AgentMessage) -> Vec<(String, bool)> {
    match message {
        AgentMessage::User {
            message:
                crate::types::messages::UserMessageContent {
                    content: Some(UserContent::Blocks(blocks)),
                    ..
                },
            ..
        } => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult {
                    tool_use_id,
                    is_error,
                    ..
                } => Some((tool_use_id.clone(), is_error.unwrap_or(false))),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn init_record(data: &serde_json::Value) -> SystemInitRecord {
    let string = |key: &str| data.get(key).and_then(|v| v.as_str()).map(str::to_string);
    SystemInitRecord {
        agent_session_id: string("session_id"),
        model: string("model"),
        cwd: string("cwd"),
        tools: data
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        permission_mode: string("permissionMode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant(text: &str) -> serde_json::Value {
        json!({
            "type": "assistant",
            "session_id": "agent-1",
            "message": {"model": "m", "content": [{"type": "text", "text": text}]}
        })
    }

    #[test]
    fn init_is_recorded_and_buffered() {
        let classifier = Classifier::default();
        let mut buffer = MessageBuffer::new();
        let out = classifier.classify(
            &json!({"type": "system", "subtype": "init", "session_id": "agent-1", "model": "m", "tools": ["Bash"]}),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        assert_eq!(out.action, ClassifyAction::Buffer);
        assert_eq!(buffer.agent_session_id(), Some("agent-1"));
        assert_eq!(buffer.system_init().map(|r| r.tools.clone()), Some(vec!["Bash".to_string()]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn tool_use_marks_progress_and_deliverables() {
        let classifier = Classifier::default();
        let mut buffer = MessageBuffer::new();
        let out = classifier.classify(
            &json!({
                "type": "assistant",
                "message": {"content": [
                    {"type": "text", "text": "Writing the file."},
                    {"type": "tool_use", "id": "t1", "name": "Write", "input": {"file_path": "/tmp/a.txt"}}
                ]}
            }),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        match out.action {
            ClassifyAction::ToolUse(calls) => assert_eq!(calls[0].name, "Write"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(buffer.tool_use_in_progress());
        assert_eq!(buffer.deliverables(), ["/tmp/a.txt".to_string()]);

        let echo = classifier.classify(
            &json!({
                "type": "user",
                "message": {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "ok"}]}
            }),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        assert_eq!(echo.action, ClassifyAction::Buffer);
        assert!(!buffer.tool_use_in_progress());
        assert_eq!(tool_results(echo.message.as_ref().unwrap()), vec![("t1".to_string(), false)]);
    }

    #[test]
    fn permission_request_is_sent_once_per_request() {
        let classifier = Classifier::default();
        let mut buffer = MessageBuffer::new();
        let first = classifier.classify(
            &assistant("Should I delete these files?"),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        assert!(matches!(first.action, ClassifyAction::PermissionRequest { .. }));
        assert!(buffer.permission_request_sent());

        let second = classifier.classify(
            &assistant("Should I delete these files?"),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        assert_eq!(second.action, ClassifyAction::Buffer);
    }

    #[test]
    fn aggregate_result_joins_deduplicated_text_and_resets() {
        let classifier = Classifier::default();
        let mut buffer = MessageBuffer::new();
        for text in ["a.txt", "b.txt", "a.txt"] {
            classifier.classify(&assistant(text), &mut buffer, ClassifyMode::Aggregate);
        }
        let out = classifier.classify(
            &json!({"type": "result", "subtype": "success", "is_error": false, "result": "done", "session_id": "agent-1", "num_turns": 2}),
            &mut buffer,
            ClassifyMode::Aggregate,
        );
        match out.action {
            ClassifyAction::FinalResult(result) => {
                assert!(result.success);
                assert_eq!(result.text, "a.txt\n\nb.txt");
                assert_eq!(result.num_turns, 2);
                assert_eq!(result.agent_session_id.as_deref(), Some("agent-1"));
                assert!(result.permission_prompt.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn aggregate_result_rechecks_permission() {
        let classifier = Classifier::default();
        let mut buffer = MessageBuffer::new();
        let out = classifier.classify(
            &json!({"type": "result", "result": "Plan ready. Shall I proceed with the migration?"}),
            &mut buffer,
            ClassifyMode::Aggregate,
        );
        match out.action {
            ClassifyAction::FinalResult(result) => assert_eq!(
                result.permission_prompt.as_deref(),
                Some("Shall I proceed with the migration?")
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn streaming_result_uses_result_text() {
        let classifier = Classifier::default();
        let mut buffer = MessageBuffer::new();
        classifier.classify(&assistant("partial"), &mut buffer, ClassifyMode::Streaming);
        let out = classifier.classify(
            &json!({"type": "result", "result": "final"}),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        match out.action {
            ClassifyAction::FinalResult(result) => assert_eq!(result.text, "final"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_and_error_types() {
        let classifier = Classifier::default();
        let mut buffer = MessageBuffer::new();
        let skip = classifier.classify(&json!({"type": "stream_event"}), &mut buffer, ClassifyMode::Streaming);
        assert_eq!(skip.action, ClassifyAction::Skip);
        let err = classifier.classify(
            &json!({"type": "error", "error": {"message": "rate limited"}}),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        assert_eq!(err.action, ClassifyAction::Error { message: "rate limited".into() });
        let malformed = classifier.classify(
            &json!({"type": "assistant", "message": 3}),
            &mut buffer,
            ClassifyMode::Streaming,
        );
        assert!(matches!(malformed.action, ClassifyAction::Error { .. }));
    }
}
