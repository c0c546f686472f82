//! The session broker
//!
//! Routes client requests to sessions and agent processes, classifies agent
//! output into events and delivers them live or through the queue.
//!
//! # Module Structure
//!
//! - `core` - `Broker` construction and the event loop
//! - `handle` - `BrokerHandle`, the cloneable command interface
//! - `commands` - Command protocol between handles and the loop
//! - `requests` - Client command handling
//! - `output` - Agent output to events
//! - `lifecycle` - Timers, health checks, close and shutdown
//! - `drain` - Paced queue drains to reconnecting clients
//! - `alerts` - Operator alerting for repeated failures

mod alerts;
mod commands;
mod core;
mod drain;
mod handle;
mod lifecycle;
mod output;
mod requests;

pub use alerts::{ALERT_THRESHOLD, AlertKind, AlertTracker};
pub use commands::{BrokerStats, StreamStarted};
pub use core::Broker;
pub use handle::{AskOutcome, BrokerHandle};
pub use requests::{APPROVE_ANSWER, DENY_ANSWER};
