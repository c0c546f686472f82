//! Session registry, timeout policy and snapshotting
//!
//! `SessionManager` is owned by the broker loop; nothing here locks. Timer
//! handles live with the caller, this type only decides what a firing means.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::BrokerConfig;
use crate::error::{CompanionError, Result};
use crate::message::{Classified, Classifier, ClassifyMode, MessageBuffer};
use crate::storage::SnapshotFile;
use crate::types::identifiers::SessionId;

use super::sanitize::{sanitize_prompt, validate_working_directory};
use super::snapshot::SessionSnapshot;
use super::state::{Session, SessionSummary, TimeoutDecision};

/// Limits and timeouts applied to sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub foreground_timeout: Duration,
    pub background_timeout: Duration,
    pub min_rearm_delay: Duration,
    pub max_session_age: Duration,
    pub max_prompt_length: usize,
    pub allow_skip_permissions: bool,
    pub forbidden_paths: Vec<PathBuf>,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            max_sessions: config.max_concurrent_sessions,
            foreground_timeout: config.foreground_timeout,
            background_timeout: config.background_timeout,
            min_rearm_delay: config.min_rearm_delay,
            max_session_age: config.max_session_age,
            max_prompt_length: config.max_prompt_length,
            allow_skip_permissions: config.allow_skip_permissions,
            forbidden_paths: config.forbidden_paths.clone(),
        }
    }
}

/// Client input for a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Caller-chosen id; generated when absent
    pub session_id: Option<SessionId>,
    pub working_directory: String,
    pub prompt: String,
    pub skip_permissions: bool,
    pub mode: ClassifyMode,
}

/// Authority for session identity, idle timeouts and the durable snapshot
#[derive(Debug)]
pub struct SessionManager {
    settings: SessionSettings,
    sessions: HashMap<SessionId, Session>,
    classifier: Classifier,
    snapshot: SnapshotFile<Vec<SessionSnapshot>>,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        classifier: Classifier,
        snapshot_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            sessions: HashMap::new(),
            classifier,
            snapshot: SnapshotFile::new(snapshot_path),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Validate input and register a session
    ///
    /// Returns the session id and the cleaned prompt. The caller persists the
    /// snapshot and arms the idle timer with [`Self::idle_delay`].
    ///
    /// # Errors
    /// - `CompanionError::Validation` for a bad prompt, working directory, a
    ///   duplicate id, or a skip-permissions request the broker does not allow
    /// - `CompanionError::Capacity` when the session ceiling is reached
    pub fn create(&mut self, request: NewSession) -> Result<(SessionId, String)> {
        let prompt = sanitize_prompt(&request.prompt, self.settings.max_prompt_length)?;
        let working_directory =
            validate_working_directory(&request.working_directory, &self.settings.forbidden_paths)?;

        if request.skip_permissions && !self.settings.allow_skip_permissions {
            return Err(CompanionError::validation(
                "Skipping permissions is disabled on this broker",
            ));
        }

        if let Some(id) = &request.session_id
            && self.sessions.contains_key(id)
        {
            return Err(CompanionError::validation(format!("Session {id} already exists")));
        }

        if self.sessions.len() >= self.settings.max_sessions {
            return Err(CompanionError::capacity(
                "Maximum concurrent sessions reached",
                self.settings.max_sessions,
            ));
        }

        let session_id = request.session_id.unwrap_or_else(SessionId::generate);
        let session = Session::new(
            session_id.clone(),
            working_directory,
            prompt.clone(),
            request.skip_permissions,
            request.mode,
        );
        log::info!(
            "[{}] Session created in {}",
            session_id,
            session.working_directory.display()
        );
        self.sessions.insert(session_id.clone(), session);
        Ok((session_id, prompt))
    }

    /// Record a new request on an existing session
    ///
    /// # Errors
    /// - `CompanionError::SessionNotFound` for an unknown id
    /// - `CompanionError::Validation` for a bad prompt
    pub fn begin_request(
        &mut self,
        session_id: &SessionId,
        prompt: &str,
        mode: ClassifyMode,
    ) -> Result<String> {
        let max = self.settings.max_prompt_length;
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CompanionError::session_not_found(session_id.as_str()))?;
        let prompt = sanitize_prompt(prompt, max)?;
        session.is_processing = true;
        session.conversation_started = true;
        session.mode = mode;
        session.touch(Instant::now());
        Ok(prompt)
    }

    /// Mark the request in flight as finished
    pub fn finish_request(&mut self, session_id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.is_processing = false;
            session.touch(Instant::now());
        }
    }

    /// Record activity without changing request state
    pub fn touch(&mut self, session_id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.touch(Instant::now());
        }
    }

    /// The session is now bound to a live process
    pub fn mark_bound(&mut self, session_id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.restored = false;
        }
    }

    /// Classify one decoded value against the session's buffer
    ///
    /// Counts as activity. Returns `None` for unknown sessions.
    pub fn classify(
        &mut self,
        session_id: &SessionId,
        value: &serde_json::Value,
    ) -> Option<Classified> {
        let session = self.sessions.get_mut(session_id)?;
        session.touch(Instant::now());
        let mode = session.mode;
        Some(self.classifier.classify(value, &mut session.buffer, mode))
    }

    /// Delay until the session's idle limit is reached, measured from `now`
    #[must_use]
    pub fn idle_delay(&self, session_id: &SessionId, now: Instant) -> Option<Duration> {
        let session = self.sessions.get(session_id)?;
        let limit = session.idle_limit(
            self.settings.foreground_timeout,
            self.settings.background_timeout,
        );
        let elapsed = now.saturating_duration_since(session.last_activity);
        Some(limit.saturating_sub(elapsed))
    }

    /// Decide what an idle timer firing at `now` means
    ///
    /// A busy session (request in flight or buffered output) never closes; it
    /// is re-checked after at least the minimum re-arm delay.
    #[must_use]
    pub fn check_timeout(&self, session_id: &SessionId, now: Instant) -> TimeoutDecision {
        let Some(session) = self.sessions.get(session_id) else {
            return TimeoutDecision::Missing;
        };
        let limit = session.idle_limit(
            self.settings.foreground_timeout,
            self.settings.background_timeout,
        );
        let elapsed = now.saturating_duration_since(session.last_activity);
        let remaining = limit.saturating_sub(elapsed);

        if session.is_processing || !session.buffer.is_empty() {
            return TimeoutDecision::Rearm(remaining.max(self.settings.min_rearm_delay));
        }
        if remaining.is_zero() {
            TimeoutDecision::Close
        } else {
            TimeoutDecision::Rearm(remaining)
        }
    }

    /// Move a session between foreground and background
    ///
    /// Returns the idle delay under the new timeout.
    ///
    /// # Errors
    /// Returns `CompanionError::SessionNotFound` for an unknown id
    pub fn set_backgrounded(
        &mut self,
        session_id: &SessionId,
        backgrounded: bool,
    ) -> Result<Duration> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CompanionError::session_not_found(session_id.as_str()))?;
        if session.backgrounded != backgrounded {
            session.backgrounded = backgrounded;
            session.backgrounded_at = backgrounded.then(Utc::now);
            log::debug!(
                "[{}] Session {}",
                session_id,
                if backgrounded { "backgrounded" } else { "foregrounded" }
            );
        }
        session.touch(Instant::now());
        self.idle_delay(session_id, Instant::now())
            .ok_or_else(|| CompanionError::session_not_found(session_id.as_str()))
    }

    /// Drop a session; returns it only the first time
    pub fn close(&mut self, session_id: &SessionId) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        log::info!("[{}] Session closed", session_id);
        Some(session)
    }

    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self.sessions.values().map(Session::summary).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut records: Vec<_> = self.sessions.values().map(SessionSnapshot::from).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Write the snapshot of all sessions
    ///
    /// # Errors
    /// Returns `CompanionError::Persistence` on disk failure; in-memory state
    /// stays authoritative
    pub async fn persist(&self) -> Result<()> {
        self.snapshot.save(&self.snapshots()).await
    }

    /// Rehydrate snapshotted sessions as restored
    ///
    /// Records that collide with a live id, point to a directory that is no
    /// longer valid, or exceed the session ceiling are skipped.
    ///
    /// # Errors
    /// Returns `CompanionError::Persistence` when snapshot files exist but none
    /// is readable
    pub async fn restore(&mut self) -> Result<Vec<SessionId>> {
        let Some(records) = self.snapshot.load().await? else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut restored = Vec::new();
        for record in records {
            if self.sessions.contains_key(&record.session_id) {
                continue;
            }
            if self.sessions.len() >= self.settings.max_sessions {
                log::warn!(
                    "[{}] Not restored: session ceiling reached",
                    record.session_id
                );
                continue;
            }
            let working_directory = match validate_working_directory(
                &record.working_directory.to_string_lossy(),
                &self.settings.forbidden_paths,
            ) {
                Ok(dir) => dir,
                Err(e) => {
                    log::warn!("[{}] Not restored: {}", record.session_id, e);
                    continue;
                }
            };

            let session = Session {
                id: record.session_id.clone(),
                working_directory,
                created_at: record.created_at,
                last_activity_at: record.last_activity,
                last_activity: now,
                is_processing: false,
                conversation_started: record.conversation_started,
                backgrounded: record.is_backgrounded,
                backgrounded_at: record.backgrounded_at,
                initial_prompt: record.initial_prompt,
                skip_permissions: record.skip_permissions,
                restored: true,
                mode: ClassifyMode::default(),
                buffer: MessageBuffer::with_agent_session_id(record.agent_session_id),
            };
            log::info!("[{}] Session restored", session.id);
            restored.push(session.id.clone());
            self.sessions.insert(session.id.clone(), session);
        }
        Ok(restored)
    }

    /// Restored sessions without a process that are older than the age limit
    ///
    /// Sessions bound to a live process are never selected by age alone.
    #[must_use]
    pub fn reconcile(
        &self,
        now: DateTime<Utc>,
        has_process: impl Fn(&SessionId) -> bool,
    ) -> Vec<SessionId> {
        let max_age = chrono::Duration::from_std(self.settings.max_session_age)
            .unwrap_or(chrono::Duration::MAX);
        self.sessions
            .values()
            .filter(|s| s.restored && !has_process(&s.id))
            .filter(|s| now.signed_duration_since(s.created_at) > max_age)
            .map(|s| s.id.clone())
            .collect()
    }
}
