//! Subprocess transport implementation using Claude Code CLI
//!
//! This module spawns the agent CLI as a subprocess and communicates with it
//! via stdin/stdout in stream-json mode.

mod command;
mod config;
mod lifecycle;
mod reader;
mod transport;

// Re-export public types
pub use command::CommandBuilder;
pub use config::{AgentLaunch, DANGEROUS_ENV_VARS};
pub use transport::SubprocessTransport;
