//! Message delivery queue for clients that are not attached

mod delivery;
mod fingerprint;

pub use delivery::{DeliveryQueue, QueueSettings, QueuedMessage};
pub use fingerprint::{content_hash, device_fingerprint};
