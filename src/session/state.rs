//! In-memory session state

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::message::{ClassifyMode, MessageBuffer};
use crate::types::identifiers::SessionId;

/// A logical conversation bound to one working directory
#[derive(Debug, Clone)]
pub struct Session {
    /// Broker-assigned identity
    pub id: SessionId,
    /// Canonical working directory
    pub working_directory: PathBuf,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Wall-clock time of the last activity
    pub last_activity_at: DateTime<Utc>,
    /// Monotonic time of the last activity, drives the idle timer
    pub last_activity: Instant,
    /// A request is in flight
    pub is_processing: bool,
    /// At least one prompt reached the agent
    pub conversation_started: bool,
    /// Client moved the session to the background
    pub backgrounded: bool,
    /// When it was backgrounded
    pub backgrounded_at: Option<DateTime<Utc>>,
    /// Prompt the session was created with
    pub initial_prompt: String,
    /// Agent runs with the skip-confirmation flag
    pub skip_permissions: bool,
    /// Rehydrated from a snapshot and not yet bound to a process
    pub restored: bool,
    /// Output mode of the current request
    pub mode: ClassifyMode,
    pub(super) buffer: MessageBuffer,
}

impl Session {
    pub(super) fn new(
        id: SessionId,
        working_directory: PathBuf,
        initial_prompt: String,
        skip_permissions: bool,
        mode: ClassifyMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            working_directory,
            created_at: now,
            last_activity_at: now,
            last_activity: Instant::now(),
            is_processing: false,
            conversation_started: false,
            backgrounded: false,
            backgrounded_at: None,
            initial_prompt,
            skip_permissions,
            restored: false,
            mode,
            buffer: MessageBuffer::new(),
        }
    }

    /// Buffer the classifier accumulates into
    #[must_use]
    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Agent conversation id, once reported
    #[must_use]
    pub fn agent_session_id(&self) -> Option<&str> {
        self.buffer.agent_session_id()
    }

    pub(super) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.last_activity_at = Utc::now();
    }

    /// Idle limit under the current foreground/background state
    #[must_use]
    pub fn idle_limit(&self, foreground: Duration, background: Duration) -> Duration {
        if self.backgrounded {
            background
        } else {
            foreground
        }
    }

    /// Listing view
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            working_directory: self.working_directory.to_string_lossy().into_owned(),
            created_at: self.created_at,
            last_activity: self.last_activity_at,
            is_processing: self.is_processing,
            is_backgrounded: self.backgrounded,
            restored: self.restored,
            agent_session_id: self.agent_session_id().map(str::to_string),
        }
    }
}

/// Session as reported by `listSessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub working_directory: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_processing: bool,
    pub is_backgrounded: bool,
    pub restored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
}

/// Outcome of an idle timer firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutDecision {
    /// Still busy or not yet idle long enough; check again after the delay
    Rearm(Duration),
    /// Idle past the limit with nothing pending
    Close,
    /// Session no longer exists
    Missing,
}
