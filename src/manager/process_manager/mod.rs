//! Process orchestrator implementation
//!
//! This module is organized into logical submodules:
//! - `core`: Core struct, settings, queries and shutdown
//! - `spawn`: Admission and process spawning
//! - `interaction`: Prompt delivery, state transitions and termination
//! - `monitor`: TTL and liveness checks

mod core;
mod interaction;
mod monitor;
mod spawn;

pub use core::{ProcessManager, ProcessSettings};
pub use spawn::SpawnRequest;
