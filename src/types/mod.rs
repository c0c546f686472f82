//! Type definitions for the companion broker
//!
//! - [`identifiers`] - Type-safe ID wrappers (`SessionId`, `ClientId`, `MessageId`, `Fingerprint`)
//! - [`messages`] - Agent stream-json message and content block types
//! - [`events`] - Broker lifecycle/output events
//! - [`envelope`] - Client wire envelopes

pub mod envelope;
pub mod events;
pub mod identifiers;
pub mod messages;

// Re-export commonly used types
pub use envelope::{InboundEnvelope, InboundRequest, OutboundEnvelope};
pub use events::{BrokerEvent, CleanupReason, FinalResult};
pub use identifiers::{ClientId, Fingerprint, MessageId, SessionId};
pub use messages::{AgentMessage, ContentBlock};
