//! Process state structures
//!
//! Defines the per-process bookkeeping held by the orchestrator and the
//! messages collector tasks report back to the broker loop.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::commands::ProcessCommand;
use crate::types::identifiers::SessionId;

/// Lifecycle of one agent process
///
/// `Spawning → AwaitingId → Active → Draining → Terminated`; `Terminated`
/// processes are removed from the table, so it is only observed in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
    /// Collector started, process not yet running
    Spawning,
    /// Running; the agent has not reported its conversation id yet
    AwaitingId,
    /// Running with a known conversation id
    Active,
    /// Termination requested
    Draining,
    /// Exited
    Terminated,
}

impl ProcessState {
    /// Whether the process may accept prompts
    #[must_use]
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Spawning | Self::AwaitingId | Self::Active)
    }
}

/// What a collector task observed
#[derive(Debug, Clone, PartialEq)]
pub enum OutputKind {
    /// Process is running
    Started {
        /// OS process id
        pid: Option<u32>,
    },
    /// One decoded stdout value
    Message(serde_json::Value),
    /// A prompt could not be written
    WriteFailed(String),
    /// Process is gone
    Exited {
        /// Exit code, when known
        exit_code: Option<i32>,
        /// Whether the exit followed a termination request
        expected: bool,
        /// Spawn or wait failure, if that is why it ended
        error: Option<String>,
    },
}

/// Collector report tagged with its session
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Owning session
    pub session_id: SessionId,
    /// Observation
    pub kind: OutputKind,
}

/// Finding of a periodic health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// Fewer than the warning threshold remains before the TTL; fired once
    ExpiryWarning {
        /// Session
        session_id: SessionId,
        /// Time left before expiry
        remaining: Duration,
    },
    /// TTL exceeded
    Expired {
        /// Session
        session_id: SessionId,
    },
    /// Collector task vanished without reporting an exit
    Lost {
        /// Session
        session_id: SessionId,
    },
}

/// Live process data held by the orchestrator
pub(super) struct ProcessHandle {
    /// Channel for sending commands to the collector task
    pub command_tx: mpsc::UnboundedSender<ProcessCommand>,

    /// Current lifecycle state
    pub state: ProcessState,

    /// OS process id once running
    pub pid: Option<u32>,

    /// When the process was spawned
    pub created_at: Instant,

    /// Whether the expiry warning was already emitted
    pub warned: bool,
}
