//! Command protocol between broker handles and the broker loop

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::session::SessionSummary;
use crate::types::envelope::{
    AckRequest, OutboundEnvelope, PermissionResponse, SendRequest, StartRequest,
};
use crate::types::events::FinalResult;
use crate::types::identifiers::{ClientId, Fingerprint, MessageId, SessionId};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Pending terminal response of an `ask`
#[derive(Debug)]
pub(crate) struct AskTicket {
    pub session_id: SessionId,
    pub result: oneshot::Receiver<Result<FinalResult>>,
}

/// Reply to `streamStart`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStarted {
    pub session_id: SessionId,
    /// Session was rehydrated from a snapshot
    pub restored: bool,
    /// A new session was created for this request
    pub created: bool,
}

/// Counters reported by `/health`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub sessions: usize,
    pub processes: usize,
    pub connections: usize,
    pub queued: usize,
}

/// Messages processed by the broker loop
///
/// Every mutation of session, process and queue state goes through here.
pub(crate) enum BrokerCommand {
    Ask {
        client_id: Option<ClientId>,
        request: StartRequest,
        reply: Reply<AskTicket>,
    },
    StreamStart {
        client_id: ClientId,
        request: StartRequest,
        reply: Reply<StreamStarted>,
    },
    StreamSend {
        client_id: Option<ClientId>,
        request: SendRequest,
        reply: Reply<()>,
    },
    StreamClose {
        session_id: SessionId,
        reply: Reply<()>,
    },
    Permission {
        response: PermissionResponse,
        reply: Reply<()>,
    },
    /// Attach a client to a session and drain its queue
    Attach {
        client_id: ClientId,
        session_id: SessionId,
        reply: Reply<usize>,
    },
    Ack {
        client_id: ClientId,
        request: AckRequest,
        reply: Reply<usize>,
    },
    SetBackground {
        session_id: SessionId,
        backgrounded: bool,
        reply: Reply<()>,
    },
    ListSessions {
        reply: oneshot::Sender<Vec<SessionSummary>>,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
    /// The `ask` caller stopped waiting; route the result to clients instead
    DetachWaiter {
        session_id: SessionId,
    },
    /// An `ask` result its caller could not hand to the client
    Requeue {
        session_id: SessionId,
        envelope: OutboundEnvelope,
    },
    /// A drain batch finished
    MarkDelivered {
        session_id: SessionId,
        ids: Vec<MessageId>,
        fingerprint: Fingerprint,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
