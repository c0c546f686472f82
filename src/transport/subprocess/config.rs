//! Configuration constants and types for subprocess transport

use std::path::PathBuf;

/// Dangerous environment variables that are never forwarded to the agent
///
/// These variables can affect how the subprocess loads and executes code.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

/// Value of `CLAUDE_CODE_ENTRYPOINT` for processes started by the broker
pub const ENTRYPOINT: &str = "companion";

/// Read chunk size for stdout and stderr
pub const READ_CHUNK_SIZE: usize = 8192;

/// Everything needed to launch one agent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLaunch {
    /// Agent executable
    pub cli_path: PathBuf,
    /// Arguments placed before the agent flags
    pub prefix_args: Vec<String>,
    /// Directory the agent is bound to
    pub working_directory: PathBuf,
    /// Agent conversation to resume
    pub resume: Option<String>,
    /// Pass `--dangerously-skip-permissions`
    pub skip_permissions: bool,
    /// Maximum size of a single decoded value
    pub max_buffer_size: usize,
}

impl AgentLaunch {
    /// Launch settings with defaults for everything but the executable and directory
    pub fn new(cli_path: impl Into<PathBuf>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: cli_path.into(),
            prefix_args: Vec::new(),
            working_directory: working_directory.into(),
            resume: None,
            skip_permissions: false,
            max_buffer_size: crate::message::decoder::DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}
