//! Process spawning logic
//!
//! Admission control plus creation of the transport and its collector task.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{CompanionError, Result};
use crate::transport::{AgentLaunch, SubprocessTransport};
use crate::types::identifiers::SessionId;

use super::super::background::spawn_process_collector;
use super::super::process::{ProcessHandle, ProcessState};
use super::core::ProcessManager;

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Parameters for spawning an agent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Directory the agent is bound to (already validated)
    pub working_directory: PathBuf,
    /// Agent conversation to resume
    pub resume: Option<String>,
    /// Pass the skip-confirmation flag
    pub skip_permissions: bool,
}

// ============================================================================
// SPAWN IMPLEMENTATION
// ============================================================================

impl ProcessManager {
    /// Start an agent process for `session_id`
    ///
    /// Returns once the collector task is running; the process itself starts
    /// asynchronously and reports `Started` or `Exited` on the output channel.
    /// Prompts sent before it is up are queued in the command channel.
    ///
    /// # Errors
    /// - `CompanionError::Process` if the session already has a process
    /// - `CompanionError::Capacity` if the pool is full
    pub fn spawn(&mut self, session_id: &SessionId, request: SpawnRequest) -> Result<()> {
        if let Some(existing) = self.processes.get(session_id) {
            return Err(CompanionError::process(
                format!("Session already has a {:?} agent process", existing.state),
                None,
            ));
        }

        if self.processes.len() >= self.settings.max_processes {
            return Err(CompanionError::capacity(
                "Maximum concurrent agent processes reached",
                self.settings.max_processes,
            ));
        }

        let launch = AgentLaunch {
            cli_path: self.settings.cli_path.clone(),
            prefix_args: self.settings.prefix_args.clone(),
            working_directory: request.working_directory,
            resume: request.resume,
            skip_permissions: request.skip_permissions,
            max_buffer_size: self.settings.max_buffer_size,
        };
        let transport = SubprocessTransport::new(
            launch,
            session_id.as_str(),
            self.settings.termination_grace,
        );

        // Create command channel
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        self.processes.insert(
            session_id.clone(),
            ProcessHandle {
                command_tx,
                state: ProcessState::Spawning,
                pid: None,
                created_at: Instant::now(),
                warned: false,
            },
        );

        spawn_process_collector(
            transport,
            session_id.clone(),
            command_rx,
            self.output_tx.clone(),
        );

        log::debug!(
            "[{}] Spawning agent ({} of {} slots in use)",
            session_id,
            self.processes.len(),
            self.settings.max_processes
        );
        Ok(())
    }
}
