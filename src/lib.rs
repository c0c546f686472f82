#![recursion_limit = "256"]

//! # Claude Companion Broker
//!
//! Backend session broker for companion clients that drive Claude Code agents
//! over a WebSocket. Clients connect, start or continue sessions bound to a
//! working directory, and receive the agent's streamed output as typed events.
//! Clients that drop and reconnect pick up whatever they missed from a durable
//! delivery queue.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kodegen_claude_companion::{BrokerConfig, server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::load(None)?;
//!     config.validate()?;
//!
//!     let server = server::start(config).await?;
//!     log::info!("Listening on {}", server.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## In-process use
//!
//! The broker can be driven without the WebSocket layer through a
//! [`BrokerHandle`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use kodegen_claude_companion::{Broker, BrokerConfig, ClientRegistry};
//! # use kodegen_claude_companion::types::envelope::StartRequest;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BrokerConfig::default();
//! let registry = Arc::new(ClientRegistry::new(256));
//! let (broker, _task) = Broker::spawn(&config, registry).await?;
//!
//! let outcome = broker
//!     .ask(None, StartRequest {
//!         prompt: "Summarise the README".to_string(),
//!         working_directory: "~/projects/demo".to_string(),
//!         ..StartRequest::default()
//!     })
//!     .await?;
//! log::info!("{}", outcome.result.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`message`]: Stream decoder, message parser and classifier
//! - [`manager`]: Agent process orchestration (pool ceiling, TTL, termination)
//! - [`transport`]: Subprocess plumbing to the Claude Code CLI
//! - [`session`]: Session lifecycle, timeouts and snapshots
//! - [`queue`]: Durable delivery queue with acknowledgment
//! - [`connection`]: Client registry, reconnection history and broadcasting
//! - [`broker`]: The loop tying sessions, processes and delivery together
//! - [`server`]: `axum` WebSocket and health endpoints
//! - [`config`]: Layered configuration
//! - [`error`]: Error types and handling
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, CompanionError>`](Result).
//! [`CompanionError::code`] gives the stable code sent to clients in `error`
//! and `streamError` envelopes.
//!
//! ## Requirements
//!
//! - Claude Code: `npm install -g @anthropic-ai/claude-code`, or point
//!   `CLAUDE_CLI_PATH` at the executable

#![warn(clippy::all)]

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod message;
pub mod queue;
pub mod server;
pub mod session;
pub mod storage;
pub mod timers;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use broker::{AskOutcome, Broker, BrokerHandle, BrokerStats, StreamStarted};
pub use config::BrokerConfig;
pub use connection::{Broadcaster, ClientRegistry, ConnectionHistory, Delivery};
pub use error::{CompanionError, Result};
pub use manager::{ProcessManager, ProcessSettings};
pub use message::{Classifier, ClassifyAction, ClassifyMode, StreamDecoder};
pub use queue::{DeliveryQueue, QueuedMessage};
pub use server::{CompanionServer, start};
pub use session::{SessionManager, SessionSummary};
pub use transport::{SubprocessTransport, Transport};
pub use types::{
    BrokerEvent, ClientId, CleanupReason, FinalResult, Fingerprint, InboundRequest, MessageId,
    OutboundEnvelope, SessionId,
};

/// Version of the broker
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
