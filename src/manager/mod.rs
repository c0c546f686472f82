//! Agent process orchestration
//!
//! Provides `ProcessManager` for spawning, supervising and terminating agent
//! processes under a pool-wide concurrency ceiling and a per-process TTL.
//!
//! # Module Structure
//!
//! - `process_manager` - Core `ProcessManager` with public API
//! - `process` - Process state structures and collector reports
//! - `commands` - Command protocol for collector tasks
//! - `background` - Collector task spawning

mod background;
mod commands;
mod process;
mod process_manager;

pub use process::{HealthEvent, OutputKind, ProcessOutput, ProcessState};
pub use process_manager::{ProcessManager, ProcessSettings, SpawnRequest};
