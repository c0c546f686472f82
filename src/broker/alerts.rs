//! Operator alerting for repeated failures

use std::fmt::Display;

/// Consecutive failures of one kind before an operator alert
pub const ALERT_THRESHOLD: u32 = 3;

/// Failure kinds that are tracked for alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Process,
    Persistence,
}

impl AlertKind {
    fn label(self) -> &'static str {
        match self {
            Self::Process => "agent process",
            Self::Persistence => "persistence",
        }
    }
}

/// Counts consecutive failures per kind
///
/// Failures below the threshold log at `warn`; reaching it logs at `error`.
/// Any success resets the kind's counter.
#[derive(Debug, Default)]
pub struct AlertTracker {
    process: u32,
    persistence: u32,
}

impl AlertTracker {
    fn counter(&mut self, kind: AlertKind) -> &mut u32 {
        match kind {
            AlertKind::Process => &mut self.process,
            AlertKind::Persistence => &mut self.persistence,
        }
    }

    /// Record a failure; returns true when it raised an alert
    pub fn failure(&mut self, kind: AlertKind, error: &dyn Display) -> bool {
        let counter = self.counter(kind);
        *counter += 1;
        let count = *counter;
        if count >= ALERT_THRESHOLD {
            log::error!(
                "ALERT: {} consecutive {} failures, latest: {}",
                count,
                kind.label(),
                error
            );
            true
        } else {
            log::warn!("{} failure: {}", kind.label(), error);
            false
        }
    }

    pub fn success(&mut self, kind: AlertKind) {
        *self.counter(kind) = 0;
    }

    #[must_use]
    pub fn consecutive(&self, kind: AlertKind) -> u32 {
        match kind {
            AlertKind::Process => self.process,
            AlertKind::Persistence => self.persistence,
        }
    }
}
