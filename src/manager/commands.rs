//! Process command protocol
//!
//! Defines the command messages sent to a process collector task via its
//! channel, so the transport is owned by exactly one task.

use tokio::sync::oneshot;

use crate::error::Result;

/// Commands that can be sent to a process collector task
pub(crate) enum ProcessCommand {
    /// Write one stream-json user turn to the agent's stdin
    Send {
        /// Serialized line, newline terminated
        line: String,
    },

    /// Terminate the agent process
    Shutdown {
        /// Receives the exit code once the process is gone
        response_tx: oneshot::Sender<Result<Option<i32>>>,
    },
}
