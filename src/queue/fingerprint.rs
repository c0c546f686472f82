//! Content and device fingerprints

use sha2::{Digest, Sha256};

use crate::types::envelope::OutboundEnvelope;
use crate::types::identifiers::Fingerprint;

/// Keys that vary between otherwise identical payloads
const VOLATILE_KEYS: &[&str] = &["timestamp", "requestId", "messageId"];

/// Length of a device fingerprint in hex characters
const DEVICE_FINGERPRINT_LEN: usize = 16;

fn strip_volatile(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_volatile(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(strip_volatile).collect())
        }
        other => other.clone(),
    }
}

/// Stable hash of the semantically relevant part of an envelope
///
/// Timestamps and ids are ignored at any depth. Object keys serialize in
/// sorted order, so the hash does not depend on insertion order.
#[must_use]
pub fn content_hash(envelope: &OutboundEnvelope) -> String {
    let relevant = serde_json::json!({
        "type": envelope.kind,
        "data": strip_volatile(&envelope.data),
    });
    hex::encode(Sha256::digest(relevant.to_string().as_bytes()))
}

/// Reconnection fingerprint of a client
///
/// Prefers the client-declared device id, then the user agent string, then
/// `fallback` (which makes the fingerprint unique to one connection).
#[must_use]
pub fn device_fingerprint(
    device_id: Option<&str>,
    user_agent: Option<&str>,
    fallback: &str,
) -> Fingerprint {
    let source = match (device_id.filter(|d| !d.trim().is_empty()), user_agent) {
        (Some(device), _) => format!("device:{}", device.trim()),
        (None, Some(agent)) if !agent.trim().is_empty() => format!("agent:{}", agent.trim()),
        _ => format!("connection:{fallback}"),
    };
    let mut digest = hex::encode(Sha256::digest(source.as_bytes()));
    digest.truncate(DEVICE_FINGERPRINT_LEN);
    Fingerprint::new(digest)
}
