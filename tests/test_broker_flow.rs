//! End-to-end tests through the request handler and broker loop
//!
//! A `/bin/sh` script stands in for the agent: for every prompt line on stdin
//! it prints an init and an assistant message, sleeps, then prints a result.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use kodegen_claude_companion::connection::Registration;
use kodegen_claude_companion::server::RequestHandler;
use kodegen_claude_companion::types::envelope::StartRequest;
use kodegen_claude_companion::{
    Broker, BrokerConfig, BrokerHandle, ClientId, ClientRegistry, Fingerprint, OutboundEnvelope,
    SessionId,
};
use serde_json::json;
use tokio::task::JoinHandle;

const AGENT_SCRIPT: &str = r#"
while IFS= read -r line; do
  echo '{"type":"system","subtype":"init","session_id":"agent-e2e","model":"test-model","tools":[]}'
  echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Here are the files."}]},"session_id":"agent-e2e"}'
  sleep 1
  echo '{"type":"result","subtype":"success","result":"Here are the files.","is_error":false,"duration_ms":5,"num_turns":1,"session_id":"agent-e2e"}'
done
"#;

/// Output starts after a second and the result follows two seconds later
const DELAYED_SCRIPT: &str = r#"
while IFS= read -r line; do
  sleep 1
  echo '{"type":"system","subtype":"init","session_id":"agent-slow","model":"test-model","tools":[]}'
  echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Working on it."}]},"session_id":"agent-slow"}'
  sleep 2
  echo '{"type":"result","subtype":"success","result":"Done.","is_error":false,"duration_ms":5,"num_turns":1,"session_id":"agent-slow"}'
done
"#;

/// Asks for confirmation, waits for the answer, then finishes
const PERMISSION_SCRIPT: &str = r#"
while IFS= read -r line; do
  echo '{"type":"system","subtype":"init","session_id":"agent-perm","model":"test-model","tools":[]}'
  echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Should I delete the old migrations?"}]},"session_id":"agent-perm"}'
  IFS= read -r answer
  sleep 2
  echo '{"type":"result","subtype":"success","result":"Finished.","is_error":false,"duration_ms":5,"num_turns":2,"session_id":"agent-perm"}'
done
"#;

struct Harness {
    _dir: tempfile::TempDir,
    workdir: String,
    registry: Arc<ClientRegistry>,
    broker: BrokerHandle,
    handler: RequestHandler,
    task: JoinHandle<()>,
}

async fn harness() -> Harness {
    harness_with(AGENT_SCRIPT, |_| {}).await
}

async fn harness_with(agent_script: &str, tweak: impl FnOnce(&mut BrokerConfig)) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent.sh");
    std::fs::write(&script, agent_script).unwrap();
    let workdir = dir.path().join("work");
    std::fs::create_dir_all(&workdir).unwrap();

    let mut config = BrokerConfig {
        data_dir: dir.path().join("data"),
        cli_path: Some("/bin/sh".into()),
        cli_prefix_args: vec![script.to_string_lossy().into_owned()],
        forbidden_paths: Vec::new(),
        drain_spacing: Duration::from_millis(10),
        ..BrokerConfig::default()
    };
    tweak(&mut config);

    let registry = Arc::new(ClientRegistry::new(64));
    let (broker, task) = Broker::spawn(&config, Arc::clone(&registry)).await.unwrap();
    let handler = RequestHandler::new(broker.clone(), Arc::clone(&registry));
    Harness {
        workdir: workdir.to_string_lossy().into_owned(),
        _dir: dir,
        registry,
        broker,
        handler,
        task,
    }
}

impl Harness {
    async fn request(&self, client: &ClientId, frame: serde_json::Value) -> Vec<OutboundEnvelope> {
        self.handler.handle(client, &frame.to_string()).await
    }

    fn start_request(&self, prompt: &str) -> StartRequest {
        StartRequest {
            prompt: prompt.to_string(),
            working_directory: self.workdir.clone(),
            ..StartRequest::default()
        }
    }

    async fn start_stream(&self, client: &ClientId, prompt: &str) -> SessionId {
        let replies = self
            .request(
                client,
                json!({"type":"streamStart","data":{"prompt":prompt,"workingDirectory":self.workdir}}),
            )
            .await;
        assert_eq!(replies[0].kind, "streamStarted", "{replies:?}");
        SessionId::new(replies[0].data["sessionId"].as_str().unwrap())
    }

    async fn stop(self) {
        self.broker.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

async fn next_of_kind(registration: &mut Registration, kind: &str) -> OutboundEnvelope {
    let wait = async {
        loop {
            let text = registration.outbound.recv().await.expect("client channel closed");
            let envelope: OutboundEnvelope = serde_json::from_str(&text).unwrap();
            if envelope.kind == kind {
                return envelope;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("no '{kind}' within 10s"))
}

async fn next_frame(registration: &mut Registration) -> OutboundEnvelope {
    let text = tokio::time::timeout(Duration::from_secs(10), registration.outbound.recv())
        .await
        .expect("no frame within 10s")
        .expect("client channel closed");
    serde_json::from_str(&text).unwrap()
}

async fn wait_until_idle(broker: &BrokerHandle, session_id: &SessionId) {
    for _ in 0..100 {
        let sessions = broker.list_sessions().await.unwrap();
        if sessions
            .iter()
            .any(|s| &s.session_id == session_id && !s.is_processing)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("session {session_id} never went idle");
}

async fn assert_silent(registration: &mut Registration, for_ms: u64) {
    let got = tokio::time::timeout(Duration::from_millis(for_ms), registration.outbound.recv()).await;
    assert!(got.is_err(), "unexpected delivery: {got:?}");
}

async fn wait_for_queued(broker: &BrokerHandle, expected: usize) {
    for _ in 0..100 {
        if broker.stats().await.unwrap().queued == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("queue never reached {expected}");
}

#[tokio::test]
async fn test_result_missed_while_disconnected_is_delivered_once_after_reconnect() {
    let h = harness().await;

    // Client A starts a session and sees streamed output
    let mut a = h.registry.register(Fingerprint::new("phone"));
    let replies = h
        .request(
            &a.client_id,
            json!({"type":"streamStart","requestId":"r1","data":{"prompt":"list files","workingDirectory":h.workdir}}),
        )
        .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, "streamStarted");
    assert_eq!(replies[0].request_id.as_deref(), Some("r1"));
    let session_id = replies[0].data["sessionId"].as_str().unwrap().to_string();

    let assistant = next_of_kind(&mut a, "assistantMessage").await;
    assert_eq!(assistant.data["content"], "Here are the files.");
    assert!(assistant.message_id.is_none());

    // A drops before the result arrives
    h.registry.unregister(&a.client_id);
    wait_for_queued(&h.broker, 1).await;

    // Same device reconnects and drains
    let mut b = h.registry.register(Fingerprint::new("phone"));
    let replies = h
        .request(&b.client_id, json!({"type":"attach","data":{"sessionId":session_id}}))
        .await;
    assert_eq!(replies[0].kind, "attached");
    assert_eq!(replies[0].data["queued"], 1);

    let result = next_of_kind(&mut b, "conversationResult").await;
    assert_eq!(result.data["text"], "Here are the files.");
    assert_eq!(result.data["sessionId"], session_id.as_str());
    let message_id = result.message_id.clone().expect("queued delivery carries a messageId");
    assert_silent(&mut b, 300).await;

    let replies = h
        .request(
            &b.client_id,
            json!({"type":"ack","data":{"sessionId":session_id,"messageIds":[message_id]}}),
        )
        .await;
    assert_eq!(replies[0].kind, "acknowledged");
    assert_eq!(replies[0].data["count"], 1);
    wait_for_queued(&h.broker, 0).await;

    // A new device attaching afterwards gets nothing replayed
    let mut c = h.registry.register(Fingerprint::new("laptop"));
    let replies = h
        .request(&c.client_id, json!({"type":"attach","data":{"sessionId":session_id}}))
        .await;
    assert_eq!(replies[0].data["queued"], 0);
    assert_silent(&mut c, 300).await;

    h.stop().await;
}

#[tokio::test]
async fn test_ask_replies_with_result_for_request_id() {
    let h = harness().await;
    let mut client = h.registry.register(Fingerprint::new("cli"));

    let replies = h
        .request(
            &client.client_id,
            json!({"type":"ask","requestId":"q1","data":{"prompt":"summarise","workingDirectory":h.workdir}}),
        )
        .await;
    assert!(replies.is_empty());

    let result = next_of_kind(&mut client, "conversationResult").await;
    assert_eq!(result.request_id.as_deref(), Some("q1"));
    assert_eq!(result.data["success"], true);
    assert_eq!(result.data["agentSessionId"], "agent-e2e");

    let sessions = h.broker.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].is_processing);

    h.stop().await;
}

#[tokio::test]
async fn test_protocol_errors_and_ping() {
    let h = harness().await;
    let client = h.registry.register(Fingerprint::new("terminal"));

    let replies = h.handler.handle(&client.client_id, "{not json").await;
    assert_eq!(replies[0].kind, "error");
    assert_eq!(replies[0].data["code"], "PROTOCOL_ERROR");

    let replies = h.request(&client.client_id, json!({"type":"ping","requestId":"p"})).await;
    assert_eq!(replies[0].kind, "pong");
    assert_eq!(replies[0].request_id.as_deref(), Some("p"));

    let replies = h
        .request(&client.client_id, json!({"type":"attach","data":{"sessionId":"missing"}}))
        .await;
    assert_eq!(replies[0].data["code"], "SESSION_NOT_FOUND");

    let replies = h
        .request(
            &client.client_id,
            json!({"type":"streamStart","data":{"prompt":"   ","workingDirectory":h.workdir}}),
        )
        .await;
    assert_eq!(replies[0].data["code"], "VALIDATION_ERROR");
    assert_eq!(h.broker.stats().await.unwrap().sessions, 0);

    h.stop().await;
}

#[tokio::test]
async fn test_close_emits_session_closed_and_forgets_session() {
    let h = harness().await;
    let mut client = h.registry.register(Fingerprint::new("tablet"));

    let replies = h
        .request(
            &client.client_id,
            json!({"type":"streamStart","data":{"prompt":"hello","workingDirectory":h.workdir}}),
        )
        .await;
    let session_id = replies[0].data["sessionId"].as_str().unwrap().to_string();
    next_of_kind(&mut client, "assistantMessage").await;

    let replies = h
        .request(&client.client_id, json!({"type":"streamClose","data":{"sessionId":session_id}}))
        .await;
    assert_eq!(replies[0].kind, "streamClosed");

    let closed = next_of_kind(&mut client, "sessionClosed").await;
    assert_eq!(closed.data["reason"], "user_requested");
    assert!(h.broker.list_sessions().await.unwrap().is_empty());

    let replies = h
        .request(&client.client_id, json!({"type":"streamClose","data":{"sessionId":session_id}}))
        .await;
    assert_eq!(replies[0].data["code"], "SESSION_NOT_FOUND");

    h.stop().await;
}

#[tokio::test]
async fn test_ask_result_is_kept_for_a_client_that_left() {
    let h = harness().await;
    let phone = h.registry.register(Fingerprint::new("phone"));

    let replies = h
        .request(
            &phone.client_id,
            json!({"type":"ask","requestId":"q7","data":{"prompt":"summarise","workingDirectory":h.workdir}}),
        )
        .await;
    assert!(replies.is_empty());
    for _ in 0..50 {
        if h.broker.stats().await.unwrap().sessions == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Gone before the agent answers
    h.registry.unregister(&phone.client_id);
    wait_for_queued(&h.broker, 1).await;

    let session_id = h.broker.list_sessions().await.unwrap()[0].session_id.clone();
    let mut again = h.registry.register(Fingerprint::new("phone"));
    let replies = h
        .request(&again.client_id, json!({"type":"attach","data":{"sessionId":session_id}}))
        .await;
    assert_eq!(replies[0].kind, "attached");
    assert_eq!(replies[0].data["queued"], 1);

    let result = next_of_kind(&mut again, "conversationResult").await;
    assert_eq!(result.request_id.as_deref(), Some("q7"));
    assert_eq!(result.data["text"], "Here are the files.");
    let message_id = result.message_id.clone().expect("queued delivery carries a messageId");

    h.request(
        &again.client_id,
        json!({"type":"ack","data":{"sessionId":session_id,"messageIds":[message_id]}}),
    )
    .await;
    wait_for_queued(&h.broker, 0).await;

    h.stop().await;
}

#[tokio::test]
async fn test_live_events_wait_behind_queued_drain() {
    let h = harness_with(DELAYED_SCRIPT, |config| {
        config.drain_spacing = Duration::from_secs(3);
    })
    .await;

    let a = h.registry.register(Fingerprint::new("phone"));
    let session_id = h.start_stream(&a.client_id, "build it").await;
    h.registry.unregister(&a.client_id);

    // Init and assistant land in the queue, the result is still two seconds out
    wait_for_queued(&h.broker, 2).await;

    let mut b = h.registry.register(Fingerprint::new("phone"));
    let replies = h
        .request(&b.client_id, json!({"type":"attach","data":{"sessionId":session_id}}))
        .await;
    assert_eq!(replies[0].data["queued"], 2);

    let mut kinds = Vec::new();
    for _ in 0..3 {
        kinds.push(next_frame(&mut b).await.kind);
    }
    assert_eq!(kinds, ["systemInit", "assistantMessage", "conversationResult"]);

    h.stop().await;
}

#[tokio::test]
async fn test_ask_timeout_leaves_agent_running_for_next_ask() {
    let h = harness_with(DELAYED_SCRIPT, |_| {}).await;

    let mut first = h.start_request("first");
    first.timeout_ms = Some(300);
    let err = h.broker.ask(None, first).await.unwrap_err();
    assert_eq!(err.code(), "TIMEOUT");

    let stats = h.broker.stats().await.unwrap();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.processes, 1);

    let session_id = h.broker.list_sessions().await.unwrap()[0].session_id.clone();
    wait_until_idle(&h.broker, &session_id).await;

    let mut second = h.start_request("second");
    second.session_id = Some(session_id.clone());
    let outcome = h.broker.ask(None, second).await.unwrap();
    assert_eq!(outcome.session_id, session_id);
    assert!(outcome.result.success);
    assert_eq!(outcome.result.agent_session_id.as_deref(), Some("agent-slow"));
    assert_eq!(h.broker.stats().await.unwrap().processes, 1);

    h.stop().await;
}

#[tokio::test]
async fn test_permission_answer_cancels_auto_deny() {
    let h = harness_with(PERMISSION_SCRIPT, |config| {
        config.permission_timeout = Duration::from_secs(1);
    })
    .await;
    let mut client = h.registry.register(Fingerprint::new("tablet"));
    let session_id = h.start_stream(&client.client_id, "clean up").await;

    let prompt = next_of_kind(&mut client, "permissionRequired").await;
    assert!(prompt.data["prompt"].as_str().unwrap().contains("delete the old migrations"));
    while client.outbound.try_recv().is_ok() {}

    let replies = h
        .request(
            &client.client_id,
            json!({"type":"permission","data":{"sessionId":session_id,"approved":true}}),
        )
        .await;
    assert_eq!(replies[0].kind, "permissionAccepted");

    // Past the permission timeout and before the result: nothing at all
    assert_silent(&mut client, 1500).await;
    let result = next_frame(&mut client).await;
    assert_eq!(result.kind, "conversationResult");
    assert_eq!(result.data["text"], "Finished.");

    h.stop().await;
}

#[tokio::test]
async fn test_unanswered_permission_is_denied() {
    let h = harness_with(PERMISSION_SCRIPT, |config| {
        config.permission_timeout = Duration::from_secs(1);
    })
    .await;
    let mut client = h.registry.register(Fingerprint::new("tablet"));
    h.start_stream(&client.client_id, "clean up").await;

    next_of_kind(&mut client, "permissionRequired").await;
    let error = next_of_kind(&mut client, "streamError").await;
    assert_eq!(error.data["code"], "PERMISSION_TIMEOUT");

    // The agent received the denial as its next turn and finished
    let result = next_of_kind(&mut client, "conversationResult").await;
    assert_eq!(result.data["text"], "Finished.");

    h.stop().await;
}

#[tokio::test]
async fn test_idle_session_is_closed_by_its_timer() {
    let h = harness_with(AGENT_SCRIPT, |config| {
        config.foreground_timeout = Duration::from_secs(1);
        config.min_rearm_delay = Duration::from_millis(200);
    })
    .await;
    let mut client = h.registry.register(Fingerprint::new("watch"));
    let session_id = h.start_stream(&client.client_id, "hello").await;

    // Busy past the idle limit: still open
    next_of_kind(&mut client, "conversationResult").await;
    assert_eq!(h.broker.list_sessions().await.unwrap().len(), 1);

    let closed = next_of_kind(&mut client, "sessionClosed").await;
    assert_eq!(closed.data["sessionId"], session_id.as_str());
    assert_eq!(closed.data["reason"], "timeout");
    assert!(h.broker.list_sessions().await.unwrap().is_empty());

    h.stop().await;
}
