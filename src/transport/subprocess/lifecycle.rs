//! Lifecycle management for subprocess transport (connect, exit, close)

use std::process::Stdio;
use std::sync::atomic::Ordering;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{CompanionError, Result};

use super::command::CommandBuilder;
use super::config::READ_CHUNK_SIZE;
use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Spawn the agent process and set up stdio pipes
    ///
    /// # Errors
    /// Returns error if process spawning fails or stdio handles cannot be obtained
    pub(super) async fn connect_impl(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        if !self.launch.working_directory.is_dir() {
            return Err(CompanionError::validation(format!(
                "Working directory does not exist: {}",
                self.launch.working_directory.display()
            )));
        }

        let mut cmd = CommandBuilder::new(&self.launch).build();

        // Pipe stderr so the child never touches the parent terminal
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CompanionError::cli_not_found()
            } else {
                CompanionError::process(format!("Failed to start agent: {e}"), None)
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CompanionError::process("Failed to get stdin handle", None))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CompanionError::process("Failed to get stdout handle", None))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CompanionError::process("Failed to get stderr handle", None))?;

        // Drain stderr so the child never blocks on a full pipe
        let label = self.label.clone();
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];

            loop {
                match stderr.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buffer[..n]);
                        for line in text.lines().filter(|l| !l.trim().is_empty()) {
                            log::debug!("[{}] agent stderr: {}", label, line);
                        }
                    }
                }
            }
        });

        log::info!(
            "[{}] Spawned agent pid {:?} in {}",
            self.label,
            child.id(),
            self.launch.working_directory.display()
        );

        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.process = Some(child);
        self.stderr_task = Some(stderr_task);
        self.ready.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Wait for the child to exit on its own and return its exit code
    ///
    /// # Errors
    /// Returns `CompanionError::Io` if waiting fails
    pub(super) async fn wait_exit_impl(&mut self) -> Result<Option<i32>> {
        self.ready.store(false, Ordering::SeqCst);
        let Some(mut child) = self.process.take() else {
            return Ok(None);
        };
        let status = child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        Ok(status.code())
    }

    /// Terminate the process: close stdin, signal, wait out the grace period, kill
    ///
    /// # Errors
    /// Returns error if waiting on the child fails
    pub(super) async fn close_impl(&mut self) -> Result<Option<i32>> {
        self.ready.store(false, Ordering::SeqCst);

        // Closing stdin is the agent's cue to finish
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.stdout = None;

        let Some(mut child) = self.process.take() else {
            return Ok(None);
        };

        if let Ok(Some(status)) = child.try_wait() {
            return Ok(status.code());
        }

        send_terminate(&child);

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => Ok(status.code()),
            Ok(Err(e)) => Err(CompanionError::Io(e)),
            Err(_) => {
                log::warn!(
                    "[{}] Agent ignored termination for {:?}, killing",
                    self.label,
                    self.grace
                );
                let _ = child.kill().await;
                let status = child.wait().await?;
                Ok(status.code())
            }
        }
    }

    /// Handle Drop cleanup
    pub(super) fn drop_impl(&mut self) {
        // Dropping stdin closes it
        self.stdin.take();

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &tokio::process::Child) {
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        // SAFETY: plain kill(2) on a pid we spawned and have not yet reaped
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_child: &tokio::process::Child) {}
