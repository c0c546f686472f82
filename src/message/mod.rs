//! Agent output handling
//!
//! Bytes from the agent's stdout flow through three stages:
//!
//! - [`decoder`] - Extracts JSON values from a chunked, noisy byte stream
//! - [`parser`] - Turns a value into a typed [`AgentMessage`](crate::types::AgentMessage)
//! - [`classifier`] - Maps a message to a [`ClassifyAction`], updating the session's [`MessageBuffer`]
//!
//! Permission prompt detection lives in [`permission`] behind the
//! [`PermissionDetector`] trait.

pub mod buffer;
pub mod classifier;
pub mod decoder;
pub mod parser;
pub mod permission;

pub use buffer::{MessageBuffer, SystemInitRecord};
pub use classifier::{
    Classified, Classifier, ClassifyAction, ClassifyMode, ToolInvocation, assistant_text,
    tool_results,
};
pub use decoder::StreamDecoder;
pub use parser::parse_message;
pub use permission::{PermissionDetector, PhraseRules};
