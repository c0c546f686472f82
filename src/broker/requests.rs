//! Client command handling

use chrono::Utc;
use tokio::sync::oneshot;

use crate::error::{CompanionError, Result};
use crate::manager::SpawnRequest;
use crate::message::ClassifyMode;
use crate::session::NewSession;
use crate::types::envelope::{AckRequest, PermissionResponse, SendRequest, StartRequest};
use crate::types::events::CleanupReason;
use crate::types::identifiers::{ClientId, Fingerprint, MessageId, SessionId};

use super::commands::{AskTicket, BrokerCommand, BrokerStats, StreamStarted};
use super::core::{Broker, TimerKey};
use super::drain::spawn_drain;

/// User turn sent when a permission prompt is approved
pub const APPROVE_ANSWER: &str = "Yes, proceed.";

/// User turn sent when a permission prompt is denied or times out
pub const DENY_ANSWER: &str = "No, do not proceed.";

impl Broker {
    pub(super) async fn handle_command(&mut self, command: BrokerCommand) {
        match command {
            BrokerCommand::Ask {
                client_id,
                request,
                reply,
            } => {
                let result = self.ask(client_id.as_ref(), request).await;
                let _ = reply.send(result);
            }
            BrokerCommand::StreamStart {
                client_id,
                request,
                reply,
            } => {
                let result = self.start_stream(&client_id, request).await;
                let _ = reply.send(result);
            }
            BrokerCommand::StreamSend {
                client_id,
                request,
                reply,
            } => {
                let _ = reply.send(self.stream_send(client_id.as_ref(), request));
            }
            BrokerCommand::StreamClose { session_id, reply } => {
                let result = if self.close_session(&session_id, CleanupReason::UserRequested).await {
                    Ok(())
                } else {
                    Err(CompanionError::session_not_found(session_id.as_str()))
                };
                let _ = reply.send(result);
            }
            BrokerCommand::Permission { response, reply } => {
                let _ = reply.send(self.answer_permission(response));
            }
            BrokerCommand::Attach {
                client_id,
                session_id,
                reply,
            } => {
                let _ = reply.send(self.attach(&client_id, &session_id));
            }
            BrokerCommand::Ack {
                client_id,
                request,
                reply,
            } => {
                let _ = reply.send(self.ack(&client_id, request));
            }
            BrokerCommand::SetBackground {
                session_id,
                backgrounded,
                reply,
            } => {
                let result = self.set_background(&session_id, backgrounded).await;
                let _ = reply.send(result);
            }
            BrokerCommand::ListSessions { reply } => {
                let _ = reply.send(self.sessions.list());
            }
            BrokerCommand::Stats { reply } => {
                let _ = reply.send(BrokerStats {
                    sessions: self.sessions.len(),
                    processes: self.processes.live_count(),
                    connections: self.broadcaster.registry().count(),
                    queued: self.queue.len(),
                });
            }
            BrokerCommand::DetachWaiter { session_id } => {
                if self.waiters.remove(&session_id).is_some() {
                    log::debug!("[{}] Ask caller stopped waiting", session_id);
                }
            }
            BrokerCommand::Requeue {
                session_id,
                envelope,
            } => {
                if self.queue.enqueue(&session_id, envelope).is_some() {
                    log::info!("[{}] Queued ask result for a departed client", session_id);
                    self.mark_queue_dirty();
                }
            }
            BrokerCommand::MarkDelivered {
                session_id,
                ids,
                fingerprint,
            } => {
                self.queue.mark_delivered(&session_id, &ids, &fingerprint);
                self.mark_queue_dirty();
            }
            // Intercepted by the loop
            BrokerCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Create a session, spawn its agent and send the first prompt
    async fn open_session(
        &mut self,
        request: StartRequest,
        mode: ClassifyMode,
    ) -> Result<SessionId> {
        let (session_id, prompt) = self.sessions.create(NewSession {
            session_id: request.session_id,
            working_directory: request.working_directory,
            prompt: request.prompt,
            skip_permissions: request.skip_permissions,
            mode,
        })?;

        if let Err(e) = self.dispatch_prompt(&session_id, &prompt, mode) {
            self.sessions.close(&session_id);
            return Err(e);
        }
        self.persist_sessions().await;
        Ok(session_id)
    }

    /// Deliver a prompt, spawning (or resuming) the agent when needed
    pub(super) fn dispatch_prompt(
        &mut self,
        session_id: &SessionId,
        prompt: &str,
        mode: ClassifyMode,
    ) -> Result<()> {
        let prompt = self.sessions.begin_request(session_id, prompt, mode)?;

        if let Err(e) = self.ensure_process(session_id) {
            self.sessions.finish_request(session_id);
            return Err(e);
        }
        if let Err(e) = self.processes.send_prompt(session_id, &prompt) {
            self.sessions.finish_request(session_id);
            return Err(e);
        }
        self.arm_idle(session_id);
        Ok(())
    }

    fn ensure_process(&mut self, session_id: &SessionId) -> Result<()> {
        if self.processes.is_live(session_id) {
            return Ok(());
        }
        if self.processes.has_process(session_id) {
            return Err(CompanionError::process(
                format!("Agent for session {session_id} is shutting down"),
                None,
            ));
        }
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CompanionError::session_not_found(session_id.as_str()))?;
        let request = SpawnRequest {
            working_directory: session.working_directory.clone(),
            resume: session.agent_session_id().map(str::to_string),
            skip_permissions: session.skip_permissions,
        };
        if let Some(resume) = &request.resume {
            log::info!("[{}] Resuming agent conversation {}", session_id, resume);
        }
        self.processes.spawn(session_id, request)
    }

    async fn ask(
        &mut self,
        client_id: Option<&ClientId>,
        request: StartRequest,
    ) -> Result<AskTicket> {
        let session_id = match &request.session_id {
            Some(id) if self.sessions.contains(id) => {
                if self.waiters.contains_key(id) {
                    return Err(CompanionError::validation(format!(
                        "Session {id} already has a pending request"
                    )));
                }
                self.dispatch_prompt(id, &request.prompt, ClassifyMode::Aggregate)?;
                id.clone()
            }
            _ => self.open_session(request, ClassifyMode::Aggregate).await?,
        };

        if let Some(fingerprint) =
            client_id.and_then(|id| self.broadcaster.registry().fingerprint(id))
        {
            self.register_recipient(&session_id, &fingerprint);
        }

        let (tx, result) = oneshot::channel();
        self.waiters.insert(session_id.clone(), tx);
        Ok(AskTicket { session_id, result })
    }

    async fn start_stream(
        &mut self,
        client_id: &ClientId,
        request: StartRequest,
    ) -> Result<StreamStarted> {
        if let Some(id) = request.session_id.clone()
            && let Some(session) = self.sessions.get(&id)
        {
            let restored = session.restored;
            self.dispatch_prompt(&id, &request.prompt, ClassifyMode::Streaming)?;
            self.attach_client(client_id, &id);
            return Ok(StreamStarted {
                session_id: id,
                restored,
                created: false,
            });
        }

        let session_id = self.open_session(request, ClassifyMode::Streaming).await?;
        self.attach_client(client_id, &session_id);
        Ok(StreamStarted {
            session_id,
            restored: false,
            created: true,
        })
    }

    fn stream_send(&mut self, client_id: Option<&ClientId>, request: SendRequest) -> Result<()> {
        let session_id = request.session_id;
        if !self.sessions.contains(&session_id) {
            return Err(CompanionError::session_not_found(session_id.as_str()));
        }
        self.dispatch_prompt(&session_id, &request.prompt, ClassifyMode::Streaming)?;
        if let Some(client_id) = client_id {
            self.attach_client(client_id, &session_id);
        }
        Ok(())
    }

    fn answer_permission(&mut self, response: PermissionResponse) -> Result<()> {
        let session_id = response.session_id;
        let mode = self
            .sessions
            .get(&session_id)
            .map(|s| s.mode)
            .ok_or_else(|| CompanionError::session_not_found(session_id.as_str()))?;
        self.timers
            .cancel(&TimerKey::PermissionDeny(session_id.clone()));
        let answer = if response.approved {
            APPROVE_ANSWER
        } else {
            DENY_ANSWER
        };
        log::info!("[{}] Permission answered: {}", session_id, answer);
        self.dispatch_prompt(&session_id, answer, mode)
    }

    /// Attach a client and register it as a queue recipient
    fn attach_client(&mut self, client_id: &ClientId, session_id: &SessionId) -> Option<Fingerprint> {
        let fingerprint = self.broadcaster.registry().attach(client_id, session_id)?;
        self.register_recipient(session_id, &fingerprint);
        Some(fingerprint)
    }

    fn register_recipient(&mut self, session_id: &SessionId, fingerprint: &Fingerprint) {
        if self.queue.register_recipient(session_id, fingerprint) {
            self.mark_queue_dirty();
        }
    }

    /// Attach a client and drain what it missed
    ///
    /// While the drain runs, live events for the session are held for this
    /// client and released after the last queued message.
    fn attach(&mut self, client_id: &ClientId, session_id: &SessionId) -> Result<usize> {
        if !self.sessions.contains(session_id) && self.queue.len_for(session_id) == 0 {
            return Err(CompanionError::session_not_found(session_id.as_str()));
        }
        let registry = self.broadcaster.registry().clone();
        let gone = || CompanionError::transport(format!("Client {client_id} is gone"));
        let fingerprint = registry.fingerprint(client_id).ok_or_else(gone)?;

        let pending = self.queue.pending_for(session_id, &fingerprint, Utc::now());
        let count = pending.len();
        if count == 0 {
            self.attach_client(client_id, session_id).ok_or_else(gone)?;
            return Ok(0);
        }

        registry
            .attach_holding(client_id, session_id)
            .ok_or_else(gone)?;
        self.register_recipient(session_id, &fingerprint);
        log::info!(
            "[{}] Draining {} queued message(s) to client {}",
            session_id,
            count,
            client_id
        );
        spawn_drain(
            registry,
            self.command_tx.clone(),
            client_id.clone(),
            session_id.clone(),
            fingerprint,
            pending,
            self.settings.drain_spacing,
        );
        Ok(count)
    }

    fn ack(&mut self, client_id: &ClientId, request: AckRequest) -> Result<usize> {
        let fingerprint = self
            .broadcaster
            .registry()
            .fingerprint(client_id)
            .ok_or_else(|| CompanionError::transport(format!("Client {client_id} is gone")))?;
        let ids: Vec<MessageId> = request.message_ids;
        let count = self.queue.acknowledge(&request.session_id, &ids, &fingerprint);
        self.mark_queue_dirty();
        Ok(count)
    }

    async fn set_background(&mut self, session_id: &SessionId, backgrounded: bool) -> Result<()> {
        let delay = self.sessions.set_backgrounded(session_id, backgrounded)?;
        self.timers
            .schedule(TimerKey::Idle(session_id.clone()), delay);
        self.persist_sessions().await;
        Ok(())
    }
}
