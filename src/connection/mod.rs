//! Client connections, reconnection correlation and event fan-out
//!
//! # Module Structure
//!
//! - `registry` - `ClientRegistry`, the shared table of connected clients
//! - `client` - Per-connection state
//! - `history` - Fingerprint table of recently dropped connections
//! - `broadcaster` - Delivery of envelopes to attached clients

mod broadcaster;
mod client;
mod history;
mod registry;

pub use broadcaster::{Broadcaster, Delivery};
pub use client::ClientConnection;
pub use history::{ConnectionHistory, ConnectionHistoryEntry};
pub use registry::{ClientRegistry, Registration};
