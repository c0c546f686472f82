//! Newtype wrappers for type safety
//!
//! This module contains newtype wrappers that provide type safety by wrapping
//! primitive types (like String) into distinct types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Newtype Wrappers for Type Safety
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Broker-side session identifier (not the agent's own conversation id)
    SessionId
);

string_id!(
    /// Ephemeral identifier of one client connection
    ClientId
);

string_id!(
    /// Identifier of a queued outbound message
    MessageId
);

string_id!(
    /// Reconnection fingerprint derived from the client's device identity
    ///
    /// Survives reconnects, so the delivery queue uses it as the recipient key.
    Fingerprint
);

impl SessionId {
    /// Generate a fresh random session id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ClientId {
    /// Generate a fresh random client id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("client_{}", Uuid::new_v4()))
    }
}

impl MessageId {
    /// Generate a fresh random message id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("msg_{}", Uuid::new_v4()))
    }
}
