// ── Supervisor ──
//
// Single reconciliation authority. Configuration snapshots, discovery
// events, refresh requests, session closures and retry timers all arrive
// as messages on one queue and are handled strictly in order by one task,
// which is the only code that touches the registry. Sessions themselves
// run as independent tasks; the only thing they send back is their
// closure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use marquee_api::{CloseReason, SessionOutcome};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffPolicy, Closure};
use crate::error::CoreError;
use crate::launcher::SessionLauncher;
use crate::model::{DeviceConfig, DiscoveryEvent};
use crate::status::DeviceStatus;
use crate::store::{ConnectionHandle, Registry};

enum Message {
    Configuration(DeviceConfig),
    Discovery(DiscoveryEvent),
    Refresh(Option<String>),
    Closed {
        name: String,
        id: u64,
        outcome: SessionOutcome,
    },
    RetryDue {
        name: String,
        ticket: u64,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the supervisor's control loop.
///
/// All mutating calls only enqueue work and return immediately; they fail
/// only once the loop has stopped.
#[derive(Clone)]
pub struct Supervisor {
    tx: mpsc::UnboundedSender<Message>,
    snapshot: watch::Receiver<Arc<Vec<DeviceStatus>>>,
}

impl Supervisor {
    /// Spawn the control loop on the current runtime.
    pub fn start(backoff: BackoffPolicy, launcher: Arc<dyn SessionLauncher>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Registry::new();
        let snapshot = registry.subscribe();

        let worker = Worker {
            registry,
            launcher,
            backoff,
            tx: tx.clone(),
            next_session_id: 0,
            next_ticket: 0,
            retry_timers: HashMap::new(),
            shutdown: None,
        };
        tokio::spawn(worker.run(rx));

        Self { tx, snapshot }
    }

    /// Replace the set of configured devices.
    pub fn process_configuration(&self, config: DeviceConfig) -> Result<(), CoreError> {
        self.post(Message::Configuration(config))
    }

    pub fn process_discovery(&self, event: DiscoveryEvent) -> Result<(), CoreError> {
        self.post(Message::Discovery(event))
    }

    /// Tear down and reopen one device's session, or every live session
    /// when `name` is `None`.
    pub fn refresh(&self, name: Option<String>) -> Result<(), CoreError> {
        self.post(Message::Refresh(name))
    }

    pub fn snapshot(&self) -> Arc<Vec<DeviceStatus>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DeviceStatus>>> {
        self.snapshot.clone()
    }

    /// Cancel every session, wait until each has reported its closure,
    /// then stop the control loop.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.post(Message::Shutdown(ack_tx))?;
        ack_rx.await.map_err(|_| CoreError::Shutdown)
    }

    fn post(&self, message: Message) -> Result<(), CoreError> {
        self.tx.send(message).map_err(|_| CoreError::Shutdown)
    }
}

// ── Control loop ────────────────────────────────────────────────────

struct RetryTimer {
    ticket: u64,
    task: JoinHandle<()>,
}

struct Worker {
    registry: Registry,
    launcher: Arc<dyn SessionLauncher>,
    backoff: BackoffPolicy,
    /// Handed to session and timer tasks so they can report back.
    tx: mpsc::UnboundedSender<Message>,
    next_session_id: u64,
    next_ticket: u64,
    retry_timers: HashMap<String, RetryTimer>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Configuration(config) => self.process_configuration(config),
                Message::Discovery(event) => self.process_discovery(event),
                Message::Refresh(name) => self.refresh(name.as_deref()),
                Message::Closed { name, id, outcome } => self.on_closed(&name, id, outcome),
                Message::RetryDue { name, ticket } => self.on_retry_due(&name, ticket),
                Message::Shutdown(ack) => self.begin_shutdown(ack),
            }

            if self.shutdown.is_some() && self.registry.connection_count() == 0 {
                if let Some(ack) = self.shutdown.take() {
                    let _ = ack.send(());
                }
                break;
            }
        }
        debug!("supervisor stopped");
    }

    fn stopping(&self) -> bool {
        self.shutdown.is_some()
    }

    fn process_configuration(&mut self, config: DeviceConfig) {
        if self.stopping() {
            return;
        }
        let mut removed: HashSet<String> =
            self.registry.configured_names().map(str::to_owned).collect();

        for device in config.devices {
            removed.remove(&device.name);
            if self.registry.upsert_settings(&device.name, device.settings) {
                info!(device = %device.name, "config updated");
                self.apply(&device.name);
            }
        }

        for name in removed {
            self.registry.remove_settings(&name);
            info!(device = %name, "config removed");
            self.apply(&name);
        }
    }

    fn process_discovery(&mut self, event: DiscoveryEvent) {
        if self.stopping() {
            return;
        }
        let Some(name) = event.name else {
            debug!(address = ?event.address, "ignoring unnamed device");
            return;
        };
        let Some(address) = event.address else {
            debug!(device = %name, "ignoring unaddressable device");
            return;
        };

        if self.registry.upsert_address(&name, address) {
            info!(device = %name, %address, "register");
            self.apply(&name);
        }
    }

    /// Make the live state of `name` match its desired state.
    ///
    /// An existing session is only ever closed here; the replacement is
    /// opened when its closure comes back through the queue.
    fn apply(&mut self, name: &str) {
        if let Some(handle) = self.registry.connection_mut(name) {
            info!(device = %name, "disconnect");
            handle.reload();
            return;
        }

        let (Some(settings), Some(address)) = (
            self.registry.settings(name).cloned(),
            self.registry.address(name),
        ) else {
            return;
        };

        self.cancel_retry(name);

        let id = self.next_session_id;
        self.next_session_id += 1;
        let handle = ConnectionHandle::new(id);

        info!(device = %name, %address, "connect");
        let session = self
            .launcher
            .launch(name.to_owned(), settings, address, handle.cancel.clone());
        let tx = self.tx.clone();
        let owned = name.to_owned();
        tokio::spawn(async move {
            let outcome = session.await;
            let _ = tx.send(Message::Closed {
                name: owned,
                id,
                outcome,
            });
        });

        self.registry.insert_connection(name, handle);
    }

    fn refresh(&mut self, name: Option<&str>) {
        if self.stopping() {
            return;
        }
        match name {
            Some(name) => {
                if let Some(handle) = self.registry.connection_mut(name) {
                    info!(device = %name, "refresh");
                    handle.reload();
                } else {
                    debug!(device = %name, "refresh requested for device without a session");
                }
            }
            None => {
                for (name, handle) in self.registry.connections_mut() {
                    info!(device = %name, "refresh");
                    handle.reload();
                }
            }
        }
    }

    fn on_closed(&mut self, name: &str, id: u64, outcome: SessionOutcome) {
        let Some(handle) = self.registry.remove_connection(name, id) else {
            return;
        };
        if self.stopping() {
            return;
        }

        let closure = if handle.reload_requested || outcome.is_graceful() {
            Closure::Reload
        } else {
            Closure::Failure {
                reached_session: outcome.reached_session,
            }
        };
        let delay = self
            .backoff
            .next_delay(self.registry.retry_state_mut(name), closure);

        if let CloseReason::Failure(e) = &outcome.reason {
            warn!(
                device = %name,
                error = %e,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "error"
            );
        }

        if delay.is_zero() {
            self.apply(name);
        } else {
            self.schedule_retry(name, delay);
        }
    }

    fn schedule_retry(&mut self, name: &str, delay: Duration) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let tx = self.tx.clone();
        let owned = name.to_owned();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Message::RetryDue {
                name: owned,
                ticket,
            });
        });

        if let Some(previous) = self
            .retry_timers
            .insert(name.to_owned(), RetryTimer { ticket, task })
        {
            previous.task.abort();
        }
    }

    fn cancel_retry(&mut self, name: &str) {
        if let Some(timer) = self.retry_timers.remove(name) {
            timer.task.abort();
        }
    }

    fn on_retry_due(&mut self, name: &str, ticket: u64) {
        if self.stopping() {
            return;
        }
        if self.retry_timers.get(name).is_some_and(|t| t.ticket == ticket) {
            self.retry_timers.remove(name);
            self.apply(name);
        }
    }

    fn begin_shutdown(&mut self, ack: oneshot::Sender<()>) {
        info!(
            sessions = self.registry.connection_count(),
            "shutting down supervisor"
        );
        for (_, timer) in self.retry_timers.drain() {
            timer.task.abort();
        }
        for (_, handle) in self.registry.connections_mut() {
            handle.cancel.cancel();
        }
        self.shutdown = Some(ack);
    }
}
