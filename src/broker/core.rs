//! Broker construction and the event loop
//!
//! One task owns the session manager, the process manager and the delivery
//! queue. Client commands, collector output, timer firings and the health tick
//! are all serialized through [`Broker::run`], so none of that state is locked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::BrokerConfig;
use crate::connection::{Broadcaster, ClientRegistry, Delivery};
use crate::error::Result;
use crate::manager::{ProcessManager, ProcessOutput, ProcessSettings};
use crate::message::Classifier;
use crate::queue::{DeliveryQueue, QueueSettings};
use crate::session::{SessionManager, SessionSettings};
use crate::timers::Timers;
use crate::types::events::{BrokerEvent, FinalResult};
use crate::types::identifiers::SessionId;

use super::alerts::{AlertKind, AlertTracker};
use super::commands::BrokerCommand;
use super::handle::BrokerHandle;

/// Capacity of the command channel
const COMMAND_BUFFER: usize = 256;

/// Capacity of the event observer channel
const EVENT_BUFFER: usize = 1024;

/// Keys of the timers owned by the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    /// Idle timeout check
    Idle(SessionId),
    /// Auto-deny of an unanswered permission prompt
    PermissionDeny(SessionId),
}

/// Timing knobs the loop itself uses
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopSettings {
    pub health_check_interval: Duration,
    pub permission_timeout: Duration,
    pub drain_spacing: Duration,
}

struct Channels {
    commands: mpsc::Receiver<BrokerCommand>,
    output: mpsc::UnboundedReceiver<ProcessOutput>,
    timers: mpsc::UnboundedReceiver<(TimerKey, u64)>,
}

/// The session broker
pub struct Broker {
    pub(super) settings: LoopSettings,
    pub(super) sessions: SessionManager,
    pub(super) processes: ProcessManager,
    pub(super) queue: DeliveryQueue,
    pub(super) broadcaster: Broadcaster,
    pub(super) timers: Timers<TimerKey>,
    pub(super) waiters: HashMap<SessionId, oneshot::Sender<Result<FinalResult>>>,
    pub(super) alerts: AlertTracker,
    pub(super) events_tx: broadcast::Sender<BrokerEvent>,
    pub(super) command_tx: mpsc::WeakSender<BrokerCommand>,
    queue_dirty: bool,
    sessions_dirty: bool,
    channels: Option<Channels>,
}

impl Broker {
    /// Build a broker wired to `registry`
    ///
    /// # Errors
    /// Returns `CompanionError::CliNotFound` when no agent executable is
    /// configured or found on the system
    pub fn new(config: &BrokerConfig, registry: Arc<ClientRegistry>) -> Result<(Self, BrokerHandle)> {
        let process_settings = ProcessSettings::from_config(config)?;
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (output_tx, output) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let handle = BrokerHandle::new(command_tx.clone(), events_tx.clone(), config.request_timeout);

        let broker = Self {
            settings: LoopSettings {
                health_check_interval: config.health_check_interval,
                permission_timeout: config.permission_timeout,
                drain_spacing: config.drain_spacing,
            },
            sessions: SessionManager::new(
                SessionSettings::from_config(config),
                Classifier::default(),
                config.sessions_path(),
            ),
            processes: ProcessManager::new(process_settings, output_tx),
            queue: DeliveryQueue::new(QueueSettings::from_config(config), config.queue_path()),
            broadcaster: Broadcaster::new(registry),
            timers: Timers::new(timer_tx),
            waiters: HashMap::new(),
            alerts: AlertTracker::default(),
            events_tx,
            command_tx: command_tx.downgrade(),
            queue_dirty: false,
            sessions_dirty: false,
            channels: Some(Channels {
                commands,
                output,
                timers,
            }),
        };
        Ok((broker, handle))
    }

    /// Build, restore persisted state and run the loop on a new task
    ///
    /// # Errors
    /// Same as [`Broker::new`]
    pub async fn spawn(
        config: &BrokerConfig,
        registry: Arc<ClientRegistry>,
    ) -> Result<(BrokerHandle, JoinHandle<()>)> {
        let (mut broker, handle) = Self::new(config, registry)?;
        broker.restore().await;
        let task = tokio::spawn(broker.run());
        Ok((handle, task))
    }

    /// Rehydrate snapshotted sessions and the persisted queue
    ///
    /// Failures are logged; the broker starts empty rather than not at all.
    pub async fn restore(&mut self) {
        match self.sessions.restore().await {
            Ok(restored) => {
                if !restored.is_empty() {
                    log::info!("Restored {} session(s) from snapshot", restored.len());
                }
                for session_id in &restored {
                    self.arm_idle(session_id);
                }
            }
            Err(e) => {
                self.alerts.failure(AlertKind::Persistence, &e);
            }
        }

        match self.queue.load(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => log::info!("Loaded {} queued message(s)", count),
            Err(e) => {
                self.alerts.failure(AlertKind::Persistence, &e);
            }
        }
    }

    /// Process commands, agent output and timers until shut down
    ///
    /// Ends on an explicit shutdown or once every [`BrokerHandle`] is dropped.
    pub async fn run(mut self) {
        let Some(mut channels) = self.channels.take() else {
            log::error!("Broker loop started twice");
            return;
        };

        let mut health = tokio::time::interval(self.settings.health_check_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        health.tick().await;

        log::info!("Broker loop started");
        loop {
            tokio::select! {
                command = channels.commands.recv() => match command {
                    Some(BrokerCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(output) = channels.output.recv() => self.on_process_output(output).await,
                Some((key, generation)) = channels.timers.recv() => {
                    if self.timers.take_if_current(&key, generation) {
                        self.on_timer(key).await;
                    }
                }
                _ = health.tick() => self.on_health_tick().await,
            }
            self.flush_state().await;
        }
        log::info!("Broker loop stopped");
    }

    /// Emit an event to observers and attached clients, queueing it when
    /// nobody received it
    pub(super) fn publish(&mut self, event: BrokerEvent) {
        self.emit(event, true);
    }

    /// Emit an event without queueing it
    pub(super) fn publish_live(&mut self, event: BrokerEvent) {
        self.emit(event, false);
    }

    fn emit(&mut self, event: BrokerEvent, queue_if_undelivered: bool) {
        let session_id = event.session_id().clone();
        let envelope = event.to_envelope();
        let _ = self.events_tx.send(event);

        if self.broadcaster.deliver(&session_id, &envelope) == Delivery::Undelivered
            && queue_if_undelivered
            && self.queue.enqueue(&session_id, envelope).is_some()
        {
            self.queue_dirty = true;
        }
    }

    pub(super) fn mark_queue_dirty(&mut self) {
        self.queue_dirty = true;
    }

    /// Write the session snapshot once the current loop turn finishes
    pub(super) fn schedule_snapshot(&mut self) {
        self.sessions_dirty = true;
    }

    /// Arm the idle timer for the full remaining idle period
    pub(super) fn arm_idle(&mut self, session_id: &SessionId) {
        if let Some(delay) = self.sessions.idle_delay(session_id, Instant::now()) {
            self.timers.schedule(TimerKey::Idle(session_id.clone()), delay);
        }
    }

    pub(super) async fn persist_sessions(&mut self) {
        self.sessions_dirty = false;
        match self.sessions.persist().await {
            Ok(()) => self.alerts.success(AlertKind::Persistence),
            Err(e) => {
                self.alerts.failure(AlertKind::Persistence, &e);
            }
        }
    }

    pub(super) async fn persist_queue(&mut self) {
        self.queue_dirty = false;
        match self.queue.persist().await {
            Ok(()) => self.alerts.success(AlertKind::Persistence),
            Err(e) => {
                self.alerts.failure(AlertKind::Persistence, &e);
            }
        }
    }

    async fn flush_state(&mut self) {
        if self.sessions_dirty {
            self.persist_sessions().await;
        }
        if self.queue_dirty {
            self.persist_queue().await;
        }
    }
}
