//! Timers, health checks, session close and shutdown

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::error::CompanionError;
use crate::manager::HealthEvent;
use crate::session::TimeoutDecision;
use crate::types::events::{BrokerEvent, CleanupReason};
use crate::types::identifiers::SessionId;

use super::core::{Broker, TimerKey};
use super::requests::DENY_ANSWER;

/// Upper bound on waiting for one agent to exit during shutdown
const SHUTDOWN_EXIT_WAIT: Duration = Duration::from_secs(15);

impl Broker {
    pub(super) async fn on_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::Idle(session_id) => {
                match self.sessions.check_timeout(&session_id, Instant::now()) {
                    TimeoutDecision::Rearm(delay) => {
                        log::debug!("[{}] Busy or active, idle check in {:?}", session_id, delay);
                        self.timers.schedule(TimerKey::Idle(session_id), delay);
                    }
                    TimeoutDecision::Close => {
                        log::info!("[{}] Idle timeout", session_id);
                        self.close_session(&session_id, CleanupReason::Timeout).await;
                    }
                    TimeoutDecision::Missing => {}
                }
            }
            TimerKey::PermissionDeny(session_id) => self.auto_deny(&session_id),
        }
    }

    fn auto_deny(&mut self, session_id: &SessionId) {
        let Some(mode) = self.sessions.get(session_id).map(|s| s.mode) else {
            return;
        };
        log::warn!("[{}] Permission prompt unanswered, denying", session_id);
        if let Err(e) = self.dispatch_prompt(session_id, DENY_ANSWER, mode) {
            log::warn!("[{}] Could not send automatic denial: {}", session_id, e);
        }
        self.publish(BrokerEvent::StreamError {
            session_id: session_id.clone(),
            code: "PERMISSION_TIMEOUT".to_string(),
            message: "Permission request timed out and was denied".to_string(),
        });
    }

    pub(super) async fn on_health_tick(&mut self) {
        for event in self.processes.check_health(Instant::now()) {
            match event {
                HealthEvent::ExpiryWarning {
                    session_id,
                    remaining,
                } => {
                    log::info!("[{}] Agent expires in {:?}", session_id, remaining);
                    self.publish(BrokerEvent::ExpiryWarning {
                        session_id,
                        remaining_secs: remaining.as_secs(),
                    });
                }
                HealthEvent::Expired { session_id } => {
                    log::info!("[{}] Agent reached its TTL", session_id);
                    if let Some(waiter) = self.waiters.remove(&session_id) {
                        let _ = waiter.send(Err(CompanionError::timeout(
                            "Agent process reached its lifetime limit",
                        )));
                    }
                    self.publish(BrokerEvent::ProcessExpired {
                        session_id: session_id.clone(),
                    });
                    if !self.close_session(&session_id, CleanupReason::Timeout).await {
                        // Orphaned process without a session
                        let _ = self.processes.terminate(&session_id);
                    }
                }
                HealthEvent::Lost { session_id } => {
                    self.processes.on_exit(&session_id);
                    if self.sessions.contains(&session_id) {
                        self.on_process_died(
                            &session_id,
                            None,
                            "Agent collector stopped without reporting an exit".to_string(),
                        )
                        .await;
                    }
                }
            }
        }

        let stale = self
            .sessions
            .reconcile(Utc::now(), |id| self.processes.has_process(id));
        for session_id in stale {
            log::info!("[{}] Restored session exceeded its maximum age", session_id);
            self.close_session(&session_id, CleanupReason::Timeout).await;
        }

        if self.queue.purge_expired(Utc::now()) > 0 {
            self.mark_queue_dirty();
        }
    }

    /// Drop a session and everything bound to it
    ///
    /// Idempotent: returns false when the session was already gone.
    pub(super) async fn close_session(&mut self, session_id: &SessionId, reason: CleanupReason) -> bool {
        if self.sessions.close(session_id).is_none() {
            return false;
        }
        self.timers.cancel(&TimerKey::Idle(session_id.clone()));
        self.timers
            .cancel(&TimerKey::PermissionDeny(session_id.clone()));

        if let Some(waiter) = self.waiters.remove(session_id) {
            let _ = waiter.send(Err(CompanionError::process(
                format!("Session closed ({})", reason.as_str()),
                None,
            )));
        }

        // Exit is reported through the collector as an expected exit
        let _ = self.processes.terminate(session_id);

        self.publish(BrokerEvent::SessionCleaned {
            session_id: session_id.clone(),
            reason,
        });
        self.broadcaster.registry().detach_all(session_id);
        self.persist_sessions().await;
        true
    }

    /// Terminate agents and flush state; sessions stay in the snapshot
    pub(super) async fn shutdown(&mut self) {
        log::info!(
            "Broker shutting down ({} sessions, {} processes)",
            self.sessions.len(),
            self.processes.live_count()
        );
        self.timers.cancel_all();

        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(CompanionError::process("Broker is shutting down", None)));
        }

        let exits = self.processes.shutdown();
        self.persist_sessions().await;
        self.persist_queue().await;

        let waits = exits
            .into_iter()
            .map(|exit| tokio::time::timeout(SHUTDOWN_EXIT_WAIT, exit));
        for outcome in futures::future::join_all(waits).await {
            match outcome {
                Ok(Ok(Ok(code))) => log::debug!("Agent exited with {:?}", code),
                Ok(Ok(Err(e))) => log::warn!("Agent did not exit cleanly: {}", e),
                Ok(Err(_)) => {}
                Err(_) => log::warn!("Agent did not exit within {:?}", SHUTDOWN_EXIT_WAIT),
            }
        }

        self.broadcaster.registry().close_all();
        log::info!("Broker shutdown complete");
    }
}
