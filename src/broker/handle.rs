//! Cloneable handle to the broker loop

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{CompanionError, Result};
use crate::session::SessionSummary;
use crate::types::envelope::{
    AckRequest, OutboundEnvelope, PermissionResponse, SendRequest, StartRequest,
};
use crate::types::events::{BrokerEvent, FinalResult};
use crate::types::identifiers::{ClientId, SessionId};

use super::commands::{BrokerCommand, BrokerStats, Reply, StreamStarted};

/// Terminal response of an `ask`
#[derive(Debug, Clone, PartialEq)]
pub struct AskOutcome {
    pub session_id: SessionId,
    pub result: FinalResult,
}

/// Client side of the broker command channel
///
/// Every method sends one command and waits for the loop's answer.
#[derive(Clone)]
pub struct BrokerHandle {
    command_tx: mpsc::Sender<BrokerCommand>,
    events_tx: broadcast::Sender<BrokerEvent>,
    request_timeout: Duration,
}

fn broker_gone() -> CompanionError {
    CompanionError::transport("Broker is not running")
}

impl BrokerHandle {
    pub(super) fn new(
        command_tx: mpsc::Sender<BrokerCommand>,
        events_tx: broadcast::Sender<BrokerEvent>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            command_tx,
            events_tx,
            request_timeout,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> BrokerCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| broker_gone())?;
        response.await.map_err(|_| broker_gone())?
    }

    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| broker_gone())?;
        response.await.map_err(|_| broker_gone())
    }

    /// Observe every event the broker emits
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events_tx.subscribe()
    }

    /// Send a prompt and wait for the aggregated terminal response
    ///
    /// The wait is bounded by `timeout_ms` or the configured request timeout.
    /// On timeout the agent keeps running and its result is routed to
    /// attached clients or the delivery queue. When `client_id` is given its
    /// device is registered as a recipient of the session's queue, so a
    /// result it misses is kept for it.
    ///
    /// # Errors
    /// - `CompanionError::Timeout` when the wait expires
    /// - `CompanionError::Process` when the session ends without a result
    /// - any admission error from session creation
    pub async fn ask(
        &self,
        client_id: Option<ClientId>,
        request: StartRequest,
    ) -> Result<AskOutcome> {
        let wait = request
            .timeout_ms
            .map_or(self.request_timeout, Duration::from_millis);
        let ticket = self
            .request(|reply| BrokerCommand::Ask {
                client_id,
                request,
                reply,
            })
            .await?;
        let session_id = ticket.session_id;

        match tokio::time::timeout(wait, ticket.result).await {
            Ok(Ok(result)) => result.map(|result| AskOutcome { session_id, result }),
            Ok(Err(_)) => Err(CompanionError::process(
                format!("Session {session_id} ended before a result arrived"),
                None,
            )),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(BrokerCommand::DetachWaiter {
                        session_id: session_id.clone(),
                    })
                    .await;
                Err(CompanionError::timeout(format!(
                    "No result for session {session_id} within {}ms",
                    wait.as_millis()
                )))
            }
        }
    }

    /// Hand an undeliverable `ask` result back to the delivery queue
    ///
    /// # Errors
    /// `CompanionError::Transport` when the broker is gone
    pub async fn requeue(&self, session_id: SessionId, envelope: OutboundEnvelope) -> Result<()> {
        self.command_tx
            .send(BrokerCommand::Requeue {
                session_id,
                envelope,
            })
            .await
            .map_err(|_| broker_gone())
    }

    /// Start (or continue) a streaming session and attach `client_id` to it
    ///
    /// # Errors
    /// Validation, capacity or process errors from admission
    pub async fn start_stream(
        &self,
        client_id: ClientId,
        request: StartRequest,
    ) -> Result<StreamStarted> {
        self.request(|reply| BrokerCommand::StreamStart {
            client_id,
            request,
            reply,
        })
        .await
    }

    /// Send a follow-up prompt
    ///
    /// # Errors
    /// `CompanionError::SessionNotFound` or process errors
    pub async fn send(&self, client_id: Option<ClientId>, request: SendRequest) -> Result<()> {
        self.request(|reply| BrokerCommand::StreamSend {
            client_id,
            request,
            reply,
        })
        .await
    }

    /// Close a session at the client's request
    ///
    /// # Errors
    /// `CompanionError::SessionNotFound` for an unknown session
    pub async fn close(&self, session_id: SessionId) -> Result<()> {
        self.request(|reply| BrokerCommand::StreamClose { session_id, reply })
            .await
    }

    /// Answer a permission prompt
    ///
    /// # Errors
    /// `CompanionError::SessionNotFound` or process errors
    pub async fn permission(&self, response: PermissionResponse) -> Result<()> {
        self.request(|reply| BrokerCommand::Permission { response, reply })
            .await
    }

    /// Attach a client to a session; returns how many queued messages are
    /// being drained to it
    ///
    /// # Errors
    /// `CompanionError::SessionNotFound` when neither the session nor queued
    /// messages for it exist
    pub async fn attach(&self, client_id: ClientId, session_id: SessionId) -> Result<usize> {
        self.request(|reply| BrokerCommand::Attach {
            client_id,
            session_id,
            reply,
        })
        .await
    }

    /// Acknowledge queued deliveries; returns the number newly acknowledged
    ///
    /// # Errors
    /// `CompanionError::Transport` when the client is no longer registered
    pub async fn ack(&self, client_id: ClientId, request: AckRequest) -> Result<usize> {
        self.request(|reply| BrokerCommand::Ack {
            client_id,
            request,
            reply,
        })
        .await
    }

    /// Move a session between foreground and background
    ///
    /// # Errors
    /// `CompanionError::SessionNotFound` for an unknown session
    pub async fn set_background(&self, session_id: SessionId, backgrounded: bool) -> Result<()> {
        self.request(|reply| BrokerCommand::SetBackground {
            session_id,
            backgrounded,
            reply,
        })
        .await
    }

    /// # Errors
    /// `CompanionError::Transport` when the broker is gone
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.query(|reply| BrokerCommand::ListSessions { reply }).await
    }

    /// # Errors
    /// `CompanionError::Transport` when the broker is gone
    pub async fn stats(&self) -> Result<BrokerStats> {
        self.query(|reply| BrokerCommand::Stats { reply }).await
    }

    /// Terminate agents, flush state to disk and stop the loop
    ///
    /// # Errors
    /// `CompanionError::Transport` when the broker already stopped
    pub async fn shutdown(&self) -> Result<()> {
        self.query(|reply| BrokerCommand::Shutdown { reply }).await
    }
}
