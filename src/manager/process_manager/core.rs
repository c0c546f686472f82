//! Core process manager structure and lifecycle management
//!
//! Provides the main `ProcessManager` struct with initialization, queries and shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::message::decoder::DEFAULT_MAX_BUFFER_SIZE;
use crate::transport::SubprocessTransport;
use crate::types::identifiers::SessionId;

use super::super::process::{ProcessHandle, ProcessOutput, ProcessState};

// ============================================================================
// SETTINGS
// ============================================================================

/// Launch and supervision parameters shared by every process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSettings {
    /// Agent executable
    pub cli_path: PathBuf,
    /// Arguments placed before the agent flags
    pub prefix_args: Vec<String>,
    /// Pool-wide ceiling on live processes
    pub max_processes: usize,
    /// Hard lifetime of one process
    pub ttl: Duration,
    /// Remaining lifetime below which a warning fires
    pub warning_threshold: Duration,
    /// Time between the termination signal and a forced kill
    pub termination_grace: Duration,
    /// Maximum size of one decoded output value
    pub max_buffer_size: usize,
}

impl ProcessSettings {
    /// Derive settings from the broker config, locating the CLI when unset
    ///
    /// # Errors
    /// Returns `CompanionError::CliNotFound` if no agent executable is configured or found
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let cli_path = match &config.cli_path {
            Some(path) => path.clone(),
            None => SubprocessTransport::find_cli()?,
        };
        Ok(Self {
            cli_path,
            prefix_args: config.cli_prefix_args.clone(),
            max_processes: config.max_concurrent_sessions,
            ttl: config.session_ttl,
            warning_threshold: config.session_warning_threshold,
            termination_grace: config.termination_grace,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        })
    }
}

// ============================================================================
// PROCESS MANAGER CORE
// ============================================================================

/// Supervisor for the pool of agent processes
///
/// Owned by the broker loop. Each process is driven by its own collector task;
/// the manager keeps only the command channel and lifecycle bookkeeping, and
/// every observation flows back through the output channel.
pub struct ProcessManager {
    pub(super) settings: ProcessSettings,
    pub(super) processes: HashMap<SessionId, ProcessHandle>,
    pub(super) output_tx: mpsc::UnboundedSender<ProcessOutput>,
}

impl ProcessManager {
    /// Create a manager reporting collector output on `output_tx`
    #[must_use]
    pub fn new(settings: ProcessSettings, output_tx: mpsc::UnboundedSender<ProcessOutput>) -> Self {
        Self {
            settings,
            processes: HashMap::new(),
            output_tx,
        }
    }

    /// Settings in effect
    #[must_use]
    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    /// Number of processes that have not yet exited, draining included
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.processes.len()
    }

    /// Whether the session has a process that accepts prompts
    #[must_use]
    pub fn is_live(&self, session_id: &SessionId) -> bool {
        self.processes
            .get(session_id)
            .is_some_and(|p| p.state.accepts_input())
    }

    /// Whether the session has any process, draining included
    #[must_use]
    pub fn has_process(&self, session_id: &SessionId) -> bool {
        self.processes.contains_key(session_id)
    }

    /// Lifecycle state of the session's process
    #[must_use]
    pub fn state(&self, session_id: &SessionId) -> Option<ProcessState> {
        self.processes.get(session_id).map(|p| p.state)
    }

    /// Terminate every process
    ///
    /// Returns receivers that resolve once each process is gone; the caller
    /// awaits them to finish a graceful shutdown.
    pub fn shutdown(&mut self) -> Vec<oneshot::Receiver<Result<Option<i32>>>> {
        log::info!("Shutting down {} agent process(es)", self.processes.len());

        let session_ids: Vec<SessionId> = self.processes.keys().cloned().collect();
        session_ids
            .iter()
            .filter_map(|session_id| self.terminate(session_id))
            .collect()
    }
}
