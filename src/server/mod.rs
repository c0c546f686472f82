//! WebSocket service surface
//!
//! # Module Structure
//!
//! - `app` - Router, `/health` and server start/shutdown
//! - `auth` - Bearer-token check
//! - `socket` - Per-connection reader and writer tasks
//! - `handler` - Inbound request dispatch to the broker
//! - `heartbeat` - Liveness monitor

mod app;
mod auth;
mod handler;
mod heartbeat;
mod socket;

pub use app::{AppState, CompanionServer, ConnectParams, build_router, start};
pub use auth::{POLICY_VIOLATION, is_authorized, presented_token};
pub use handler::RequestHandler;
pub use heartbeat::spawn_liveness_monitor;
