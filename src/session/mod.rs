//! Session identity, idle timeouts and durable snapshots
//!
//! # Module Structure
//!
//! - `manager` - `SessionManager`, the single authority over sessions
//! - `state` - In-memory `Session` and timeout decisions
//! - `snapshot` - Records written to `sessions.json`
//! - `sanitize` - Prompt and working directory validation

mod manager;
mod sanitize;
mod snapshot;
mod state;

pub use manager::{NewSession, SessionManager, SessionSettings};
pub use sanitize::{sanitize_prompt, strip_control_chars, validate_working_directory};
pub use snapshot::SessionSnapshot;
pub use state::{Session, SessionSummary, TimeoutDecision};
