//! Agent output handling
//!
//! Collector reports are classified against the session buffer and turned
//! into broker events, preserving the agent's emission order per session.

use crate::error::CompanionError;
use crate::manager::{OutputKind, ProcessOutput};
use crate::message::{ClassifyAction, ClassifyMode, assistant_text, tool_results};
use crate::types::events::{BrokerEvent, CleanupReason, FinalResult};
use crate::types::identifiers::SessionId;
use crate::types::messages::AgentMessage;

use super::alerts::AlertKind;
use super::core::{Broker, TimerKey};

impl Broker {
    pub(super) async fn on_process_output(&mut self, output: ProcessOutput) {
        let ProcessOutput { session_id, kind } = output;
        match kind {
            OutputKind::Started { pid } => {
                log::info!("[{}] Agent running (pid {:?})", session_id, pid);
                self.processes.on_started(&session_id, pid);
                self.sessions.mark_bound(&session_id);
                self.alerts.success(AlertKind::Process);
            }
            OutputKind::Message(value) => self.on_agent_value(&session_id, &value),
            OutputKind::WriteFailed(message) => {
                let error = CompanionError::process(message, None);
                self.alerts.failure(AlertKind::Process, &error);
                self.sessions.finish_request(&session_id);
                self.fail_request(&session_id, error);
            }
            OutputKind::Exited {
                exit_code,
                expected,
                error,
            } => {
                self.processes.on_exit(&session_id);
                if expected || !self.sessions.contains(&session_id) {
                    log::debug!("[{}] Agent exited ({:?})", session_id, exit_code);
                    return;
                }
                let message = error.unwrap_or_else(|| {
                    format!("Agent exited unexpectedly with code {exit_code:?}")
                });
                self.on_process_died(&session_id, exit_code, message).await;
            }
        }
    }

    /// Dead-session cleanup, distinct from an explicit close
    pub(super) async fn on_process_died(
        &mut self,
        session_id: &SessionId,
        exit_code: Option<i32>,
        message: String,
    ) {
        let error = CompanionError::process(message, exit_code);
        self.alerts.failure(AlertKind::Process, &error);
        self.fail_request(session_id, error);
        self.publish(BrokerEvent::ProcessDied {
            session_id: session_id.clone(),
            exit_code,
        });
        self.close_session(session_id, CleanupReason::ProcessDied).await;
    }

    /// Report a request failure to its `ask` caller or to the session's clients
    pub(super) fn fail_request(&mut self, session_id: &SessionId, error: CompanionError) {
        if let Some(waiter) = self.waiters.remove(session_id) {
            let _ = waiter.send(Err(error));
            return;
        }
        self.publish(BrokerEvent::StreamError {
            session_id: session_id.clone(),
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }

    fn on_agent_value(&mut self, session_id: &SessionId, value: &serde_json::Value) {
        let Some(classified) = self.sessions.classify(session_id, value) else {
            log::debug!("[{}] Output for unknown session dropped", session_id);
            return;
        };
        let mode = self
            .sessions
            .get(session_id)
            .map_or(ClassifyMode::Streaming, |s| s.mode);
        let streaming = mode == ClassifyMode::Streaming;

        if let Some(message) = &classified.message {
            if message.agent_session_id().is_some() {
                self.processes.mark_active(session_id);
            }
            if let AgentMessage::System { subtype, .. } = message
                && subtype == "init"
            {
                self.publish_init(session_id, streaming);
            }
            if streaming && let Some(content) = assistant_text(message) {
                self.publish(BrokerEvent::Assistant {
                    session_id: session_id.clone(),
                    content,
                });
            }
            for (tool_use_id, is_error) in tool_results(message) {
                self.emit_progress(
                    streaming,
                    BrokerEvent::ToolResult {
                        session_id: session_id.clone(),
                        tool_use_id,
                        is_error,
                    },
                );
            }
        }

        match classified.action {
            ClassifyAction::Buffer | ClassifyAction::Skip => {}
            ClassifyAction::ToolUse(invocations) => {
                for invocation in invocations {
                    self.emit_progress(
                        streaming,
                        BrokerEvent::ToolUse {
                            session_id: session_id.clone(),
                            tool_use_id: invocation.id,
                            tool_name: invocation.name,
                            input: invocation.input,
                        },
                    );
                }
            }
            ClassifyAction::PermissionRequest { prompt } => {
                self.on_permission_request(session_id, prompt);
            }
            ClassifyAction::FinalResult(result) => self.on_final_result(session_id, result),
            ClassifyAction::Error { message } => {
                let code = if classified.message.is_some() {
                    "AGENT_ERROR"
                } else {
                    "PROTOCOL_ERROR"
                };
                log::warn!("[{}] {}: {}", session_id, code, message);
                self.publish(BrokerEvent::StreamError {
                    session_id: session_id.clone(),
                    code: code.to_string(),
                    message,
                });
            }
        }
    }

    /// Progress events are queued only for streaming sessions
    fn emit_progress(&mut self, streaming: bool, event: BrokerEvent) {
        if streaming {
            self.publish(event);
        } else {
            self.publish_live(event);
        }
    }

    fn publish_init(&mut self, session_id: &SessionId, streaming: bool) {
        let Some(init) = self
            .sessions
            .get(session_id)
            .and_then(|s| s.buffer().system_init().cloned())
        else {
            return;
        };
        self.schedule_snapshot();
        self.emit_progress(
            streaming,
            BrokerEvent::Init {
                session_id: session_id.clone(),
                agent_session_id: init.agent_session_id,
                model: init.model,
                tools: init.tools,
            },
        );
    }

    fn on_permission_request(&mut self, session_id: &SessionId, prompt: String) {
        log::info!("[{}] Agent asked for permission", session_id);
        self.publish(BrokerEvent::PermissionRequired {
            session_id: session_id.clone(),
            prompt,
        });
        self.timers.schedule(
            TimerKey::PermissionDeny(session_id.clone()),
            self.settings.permission_timeout,
        );
    }

    fn on_final_result(&mut self, session_id: &SessionId, result: FinalResult) {
        self.sessions.finish_request(session_id);
        self.timers
            .cancel(&TimerKey::PermissionDeny(session_id.clone()));
        self.arm_idle(session_id);
        self.schedule_snapshot();

        let result = match self.waiters.remove(session_id) {
            Some(waiter) => match waiter.send(Ok(result)) {
                Ok(()) => return,
                Err(unsent) => match unsent {
                    Ok(result) => result,
                    Err(_) => return,
                },
            },
            None => result,
        };
        log::info!(
            "[{}] Request finished (success: {})",
            session_id,
            result.success
        );
        self.publish(BrokerEvent::Result {
            session_id: session_id.clone(),
            result,
        });
    }
}
