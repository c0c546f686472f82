//! Durable session snapshot records

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::identifiers::SessionId;

use super::state::Session;

/// One session as written to `sessions.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub working_directory: PathBuf,
    pub conversation_started: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub initial_prompt: String,
    #[serde(default)]
    pub is_backgrounded: bool,
    #[serde(default)]
    pub backgrounded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip_permissions: bool,
    /// Agent conversation to resume on the next prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            working_directory: session.working_directory.clone(),
            conversation_started: session.conversation_started,
            created_at: session.created_at,
            last_activity: session.last_activity_at,
            initial_prompt: session.initial_prompt.clone(),
            is_backgrounded: session.backgrounded,
            backgrounded_at: session.backgrounded_at,
            skip_permissions: session.skip_permissions,
            agent_session_id: session.agent_session_id().map(str::to_string),
        }
    }
}
