//! Transport layer for communicating with the agent CLI
//!
//! This module provides the transport abstraction and the subprocess
//! implementation the process orchestrator drives.

pub mod subprocess;

use tokio::sync::mpsc;

use crate::error::Result;

/// Transport trait for communicating with one agent process
pub trait Transport: Send + Sync {
    /// Start the agent
    ///
    /// # Errors
    /// Returns error if the process cannot be started
    fn connect(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Write data to the agent's stdin
    ///
    /// # Errors
    /// Returns error if write fails or transport is not ready
    fn write(&mut self, data: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Decoded output values
    ///
    /// Spawns a background reader; the receiver closes when output ends.
    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<serde_json::Value>>;

    /// Check if transport is ready for communication
    fn is_ready(&self) -> bool;

    /// OS process id, when the transport is backed by a process
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Wait for the process to exit on its own, returning its exit code
    ///
    /// # Errors
    /// Returns error if waiting fails
    fn wait_exit(&mut self) -> impl std::future::Future<Output = Result<Option<i32>>> + Send;

    /// Terminate the process and clean up, returning its exit code
    ///
    /// # Errors
    /// Returns error if cleanup fails
    fn close(&mut self) -> impl std::future::Future<Output = Result<Option<i32>>> + Send;
}

pub use subprocess::{AgentLaunch, SubprocessTransport};
