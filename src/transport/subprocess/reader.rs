//! Message reading logic for subprocess transport

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::error::{CompanionError, Result};
use crate::message::StreamDecoder;

use super::config::READ_CHUNK_SIZE;
use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Read decoded values from the subprocess output
    ///
    /// Spawns a background task that feeds raw stdout chunks through a
    /// [`StreamDecoder`]. The receiver closes at EOF.
    pub(super) fn read_messages_impl(
        &mut self,
    ) -> mpsc::UnboundedReceiver<Result<serde_json::Value>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let stdout = self.stdout.take();
        let label = self.label.clone();
        let max_buffer_size = self.launch.max_buffer_size;

        let task = tokio::spawn(async move {
            let Some(mut stdout) = stdout else {
                let _ = tx.send(Err(CompanionError::transport(
                    "Not connected - stdout not available",
                )));
                return;
            };
            let mut decoder = StreamDecoder::new(max_buffer_size);
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];

            loop {
                match stdout.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for value in decoder.push(&buffer[..n]) {
                            if tx.send(Ok(value)).is_err() {
                                // Receiver dropped, stop reading
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(CompanionError::Io(e)));
                        break;
                    }
                }
            }

            if let Some(leftover) = decoder.flush() {
                log::debug!(
                    "[{}] Discarding {} bytes of incomplete output at EOF",
                    label,
                    leftover.len()
                );
            }
            if decoder.discarded() > 0 {
                log::warn!(
                    "[{}] Dropped {} malformed output value(s)",
                    label,
                    decoder.discarded()
                );
            }
        });

        self.reader_task = Some(task);

        rx
    }
}
