//! Error types for the companion broker

use thiserror::Error;

/// Main error type for the companion broker
///
/// The first six variants form the public failure taxonomy reported to
/// clients; the rest are plumbing errors that are folded into one of those
/// codes when they cross the wire.
#[derive(Error, Debug)]
pub enum CompanionError {
    /// Input rejected before any resource was touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Pool or session ceiling reached
    #[error("Capacity reached: {message} (limit {limit})")]
    Capacity {
        /// Error message
        message: String,
        /// The ceiling that was hit
        limit: usize,
    },

    /// Agent process failed to spawn, exited unexpectedly or broke a pipe
    #[error("Process error: {message}")]
    Process {
        /// Error message
        message: String,
        /// Process exit code, when known
        exit_code: Option<i32>,
    },

    /// Bounded wait exceeded; the agent process is left alive
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Disk I/O failure while snapshotting state
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Malformed inbound client message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Claude Code CLI not found or not installed
    #[error("Claude Code CLI not found: {0}")]
    CliNotFound(String),

    /// Session not known to the broker
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Transport layer error (stdin/stdout plumbing)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, CompanionError>;

impl CompanionError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a capacity error
    pub fn capacity(msg: impl Into<String>, limit: usize) -> Self {
        Self::Capacity {
            message: msg.into(),
            limit,
        }
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound(session_id.into())
    }

    /// Create a CLI not found error
    #[must_use]
    pub fn cli_not_found() -> Self {
        Self::CliNotFound(
            "Claude Code not found. Install with:\n\
             npm install -g @anthropic-ai/claude-code\n\
             \n\
             Or set CLAUDE_CLI_PATH to the claude executable"
                .to_string(),
        )
    }

    /// Stable machine-readable code sent to clients
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Capacity { .. } => "CAPACITY_ERROR",
            Self::Process { .. } | Self::CliNotFound(_) | Self::Transport(_) => "PROCESS_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Persistence(_) | Self::Io(_) => "PERSISTENCE_ERROR",
            Self::Protocol(_) | Self::Json(_) => "PROTOCOL_ERROR",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
        }
    }

    /// Whether repeated occurrences of this error should reach an operator
    #[must_use]
    pub fn requires_alert(&self) -> bool {
        matches!(self.code(), "PROCESS_ERROR" | "PERSISTENCE_ERROR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CompanionError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(CompanionError::capacity("x", 5).code(), "CAPACITY_ERROR");
        assert_eq!(CompanionError::process("x", Some(1)).code(), "PROCESS_ERROR");
        assert_eq!(CompanionError::timeout("x").code(), "TIMEOUT");
        assert_eq!(CompanionError::persistence("x").code(), "PERSISTENCE_ERROR");
        assert_eq!(CompanionError::protocol("x").code(), "PROTOCOL_ERROR");
        assert_eq!(CompanionError::session_not_found("s").code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn only_process_and_persistence_alert() {
        assert!(CompanionError::process("died", None).requires_alert());
        assert!(CompanionError::persistence("disk full").requires_alert());
        assert!(!CompanionError::timeout("slow").requires_alert());
        assert!(!CompanionError::validation("bad").requires_alert());
        assert!(!CompanionError::capacity("full", 1).requires_alert());
        assert!(!CompanionError::protocol("junk").requires_alert());
    }
}
