//! Background collector task for agent processes
//!
//! One task per process owns the transport and multiplexes commands from the
//! broker loop with decoded output from the agent.

use tokio::sync::mpsc;

use super::commands::ProcessCommand;
use super::process::{OutputKind, ProcessOutput};
use crate::transport::Transport;
use crate::types::identifiers::SessionId;

/// Spawn a task that connects `transport` and relays its output
///
/// This task owns the transport and handles:
/// - Starting the process and reporting `Started`
/// - Writing prompts received as `Send` commands
/// - Forwarding every decoded stdout value as `Message`
/// - Reporting exactly one `Exited`, tagged expected when it followed `Shutdown`
///
/// # Arguments
/// * `transport` - The transport instance (task takes ownership)
/// * `session_id` - Session the process belongs to
/// * `command_rx` - Channel receiver for process commands
/// * `output_tx` - Channel to the broker loop
pub(super) fn spawn_process_collector<T>(
    transport: T,
    session_id: SessionId,
    command_rx: mpsc::UnboundedReceiver<ProcessCommand>,
    output_tx: mpsc::UnboundedSender<ProcessOutput>,
) where
    T: Transport + 'static,
{
    tokio::spawn(run_collector(transport, session_id, command_rx, output_tx));
}

async fn run_collector<T: Transport>(
    mut transport: T,
    session_id: SessionId,
    mut command_rx: mpsc::UnboundedReceiver<ProcessCommand>,
    output_tx: mpsc::UnboundedSender<ProcessOutput>,
) {
    let report = |kind: OutputKind| {
        let _ = output_tx.send(ProcessOutput {
            session_id: session_id.clone(),
            kind,
        });
    };

    if let Err(e) = transport.connect().await {
        log::error!("[{}] Failed to start agent: {}", session_id, e);
        report(OutputKind::Exited {
            exit_code: None,
            expected: false,
            error: Some(e.to_string()),
        });
        return;
    }
    report(OutputKind::Started { pid: transport.pid() });

    let mut messages = transport.read_messages();

    loop {
        tokio::select! {
            // Handle commands from the broker loop
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ProcessCommand::Send { line }) => {
                        if let Err(e) = transport.write(&line).await {
                            log::warn!("[{}] Prompt write failed: {}", session_id, e);
                            report(OutputKind::WriteFailed(e.to_string()));
                        }
                    }
                    Some(ProcessCommand::Shutdown { response_tx }) => {
                        let result = transport.close().await;
                        let (exit_code, error) = match &result {
                            Ok(code) => (*code, None),
                            Err(e) => (None, Some(e.to_string())),
                        };
                        report(OutputKind::Exited { exit_code, expected: true, error });
                        let _ = response_tx.send(result);
                        return;
                    }
                    None => {
                        // Orchestrator dropped the handle
                        let result = transport.close().await;
                        report(OutputKind::Exited {
                            exit_code: result.ok().flatten(),
                            expected: true,
                            error: None,
                        });
                        return;
                    }
                }
            }
            // Process decoded output
            msg = messages.recv() => {
                match msg {
                    Some(Ok(value)) => report(OutputKind::Message(value)),
                    Some(Err(e)) => {
                        log::error!("[{}] Output error: {}", session_id, e);
                    }
                    None => {
                        // stdout closed: the process is exiting on its own
                        let (exit_code, error) = match transport.wait_exit().await {
                            Ok(code) => (code, None),
                            Err(e) => (None, Some(e.to_string())),
                        };
                        log::warn!("[{}] Agent exited unexpectedly with {:?}", session_id, exit_code);
                        report(OutputKind::Exited { exit_code, expected: false, error });
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CompanionError, Result};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    /// In-memory transport that records writes and replays scripted output
    struct ScriptedTransport {
        output: Vec<serde_json::Value>,
        writes: Arc<Mutex<Vec<String>>>,
        fail_connect: bool,
        hold_open: Option<mpsc::UnboundedSender<Result<serde_json::Value>>>,
    }

    impl Transport for ScriptedTransport {
        async fn connect(&mut self) -> Result<()> {
            if self.fail_connect {
                Err(CompanionError::cli_not_found())
            } else {
                Ok(())
            }
        }

        async fn write(&mut self, data: &str) -> Result<()> {
            self.writes.lock().unwrap().push(data.to_string());
            Ok(())
        }

        fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<serde_json::Value>> {
            let (tx, rx) = mpsc::unbounded_channel();
            for value in self.output.drain(..) {
                let _ = tx.send(Ok(value));
            }
            self.hold_open = Some(tx);
            rx
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn wait_exit(&mut self) -> Result<Option<i32>> {
            Ok(Some(1))
        }

        async fn close(&mut self) -> Result<Option<i32>> {
            self.hold_open = None;
            Ok(Some(0))
        }
    }

    fn transport(output: Vec<serde_json::Value>) -> (ScriptedTransport, Arc<Mutex<Vec<String>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        (
            ScriptedTransport {
                output,
                writes: writes.clone(),
                fail_connect: false,
                hold_open: None,
            },
            writes,
        )
    }

    #[tokio::test]
    async fn relays_output_and_reports_expected_exit() {
        let (transport, writes) = transport(vec![json!({"type": "system", "subtype": "init"})]);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        spawn_process_collector(transport, SessionId::new("s1"), command_rx, output_tx);

        assert_eq!(output_rx.recv().await.unwrap().kind, OutputKind::Started { pid: None });
        assert!(matches!(output_rx.recv().await.unwrap().kind, OutputKind::Message(_)));

        command_tx
            .send(ProcessCommand::Send { line: "hello\n".into() })
            .unwrap();
        let (response_tx, response_rx) = oneshot::channel();
        command_tx
            .send(ProcessCommand::Shutdown { response_tx })
            .unwrap();
        assert_eq!(response_rx.await.unwrap().unwrap(), Some(0));

        let exit = output_rx.recv().await.unwrap();
        assert_eq!(
            exit.kind,
            OutputKind::Exited { exit_code: Some(0), expected: true, error: None }
        );
        assert_eq!(writes.lock().unwrap().as_slice(), ["hello\n".to_string()]);
    }

    #[tokio::test]
    async fn connect_failure_reports_unexpected_exit() {
        let (mut transport, _) = transport(vec![]);
        transport.fail_connect = true;
        let (_command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        spawn_process_collector(transport, SessionId::new("s2"), command_rx, output_tx);

        match output_rx.recv().await.unwrap().kind {
            OutputKind::Exited { expected, error, .. } => {
                assert!(!expected);
                assert!(error.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
