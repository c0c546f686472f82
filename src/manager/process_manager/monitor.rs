//! TTL and liveness checks

use tokio::time::Instant;

use super::super::process::{HealthEvent, ProcessState};
use super::core::ProcessManager;

impl ProcessManager {
    /// Inspect every process at `now`
    ///
    /// - `Expired` once `now - createdAt` exceeds the TTL
    /// - `ExpiryWarning` once per process when less than the warning threshold remains
    /// - `Lost` when the collector task disappeared without reporting
    ///
    /// Draining processes are skipped. Acting on the findings is the caller's job.
    pub fn check_health(&mut self, now: Instant) -> Vec<HealthEvent> {
        let ttl = self.settings.ttl;
        let warning_threshold = self.settings.warning_threshold;
        let mut events = Vec::new();

        for (session_id, process) in &mut self.processes {
            if process.state == ProcessState::Draining {
                continue;
            }

            if process.command_tx.is_closed() {
                events.push(HealthEvent::Lost {
                    session_id: session_id.clone(),
                });
                continue;
            }

            let age = now.saturating_duration_since(process.created_at);
            if age > ttl {
                events.push(HealthEvent::Expired {
                    session_id: session_id.clone(),
                });
                continue;
            }

            let remaining = ttl - age;
            if remaining <= warning_threshold && !process.warned {
                process.warned = true;
                events.push(HealthEvent::ExpiryWarning {
                    session_id: session_id.clone(),
                    remaining,
                });
            }
        }

        events
    }
}
