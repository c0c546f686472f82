//! Bearer-token check for WebSocket upgrades

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

/// Close code sent to clients that fail the token check (policy violation)
pub const POLICY_VIOLATION: u16 = 1008;

/// Token presented by a connecting client
///
/// The `?token=` query parameter takes precedence over an
/// `Authorization: Bearer` header.
#[must_use]
pub fn presented_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

/// Whether `presented` satisfies the configured token
///
/// Without a configured token every connection is accepted.
#[must_use]
pub fn is_authorized(expected: Option<&str>, presented: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => presented.is_some_and(|p| constant_time_eq(expected.as_bytes(), p.as_bytes())),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
