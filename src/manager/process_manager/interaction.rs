//! Prompt delivery, state transitions and termination

use tokio::sync::oneshot;

use crate::error::{CompanionError, Result};
use crate::types::identifiers::SessionId;
use crate::types::messages::user_turn_line;

use super::super::commands::ProcessCommand;
use super::super::process::ProcessState;
use super::core::ProcessManager;

impl ProcessManager {
    /// Queue a prompt for the session's agent
    ///
    /// # Errors
    /// Returns `CompanionError::Process` if there is no process accepting input
    pub fn send_prompt(&mut self, session_id: &SessionId, prompt: &str) -> Result<()> {
        let process = self.processes.get(session_id).ok_or_else(|| {
            CompanionError::process(format!("No agent process for session {session_id}"), None)
        })?;

        if !process.state.accepts_input() {
            return Err(CompanionError::process(
                format!("Agent process for session {session_id} is shutting down"),
                None,
            ));
        }

        process
            .command_tx
            .send(ProcessCommand::Send {
                line: user_turn_line(prompt),
            })
            .map_err(|_| {
                CompanionError::process(
                    format!("Agent process for session {session_id} is no longer running"),
                    None,
                )
            })
    }

    /// Record that the process is running
    pub fn on_started(&mut self, session_id: &SessionId, pid: Option<u32>) {
        if let Some(process) = self.processes.get_mut(session_id)
            && process.state == ProcessState::Spawning
        {
            process.state = ProcessState::AwaitingId;
            process.pid = pid;
        }
    }

    /// Record that the agent reported its conversation id
    pub fn mark_active(&mut self, session_id: &SessionId) {
        if let Some(process) = self.processes.get_mut(session_id)
            && matches!(process.state, ProcessState::Spawning | ProcessState::AwaitingId)
        {
            process.state = ProcessState::Active;
        }
    }

    /// Drop bookkeeping for an exited process
    ///
    /// Returns the state it was in, or `None` if it was unknown.
    pub fn on_exit(&mut self, session_id: &SessionId) -> Option<ProcessState> {
        self.processes.remove(session_id).map(|p| p.state)
    }

    /// Ask the session's process to terminate
    ///
    /// The process stays in the table as `Draining` until its collector
    /// reports the exit, so the pool slot is released only once it is gone.
    /// Returns `None` when there is no process or it is already draining.
    pub fn terminate(
        &mut self,
        session_id: &SessionId,
    ) -> Option<oneshot::Receiver<Result<Option<i32>>>> {
        let process = self.processes.get_mut(session_id)?;
        if process.state == ProcessState::Draining {
            return None;
        }
        process.state = ProcessState::Draining;

        let (response_tx, response_rx) = oneshot::channel();
        if process
            .command_tx
            .send(ProcessCommand::Shutdown { response_tx })
            .is_err()
        {
            // Collector already gone; nothing left to wait for
            log::debug!("[{}] Collector already stopped", session_id);
            self.processes.remove(session_id);
            return None;
        }
        log::info!("[{}] Terminating agent process", session_id);
        Some(response_rx)
    }
}
