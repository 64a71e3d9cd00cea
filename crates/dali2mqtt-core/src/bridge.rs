// ── Bridge facade ──
//
// Owns the bus-side lifecycle: initial connection and discovery, the
// command processor that applies inbound requests one at a time, the
// edge-triggered health notifier, and the bus liveness probe that decides
// when the process should be restarted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dali2mqtt_bus::{Address, BusTransport, Command, Opcode};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{BridgeRequest, CommandEnvelope, CommandResult, DiscoveryReport};
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::fanout::FanoutDirectory;
use crate::health::{Channel, HealthMonitor, HealthStatus};
use crate::model::{DeviceKey, DeviceRecord, default_name};
use crate::publish::{BridgeStatus, DeviceNames, StatePublisher, display_name};
use crate::reconcile;
use crate::router::CommandRouter;
use crate::scanner;
use crate::store::DeviceStore;
use crate::supervisor::{ConnectionSupervisor, SupervisorStatus};

/// Individual address probed for bus liveness.
const PROBE_ADDRESS: Address = Address::Individual(0);

/// Why a bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExitReason {
    /// Orderly shutdown requested by the host.
    Shutdown,
    /// The interface link stayed dead past the restart threshold.
    TransportDead,
    /// A restart was requested over the message bus.
    RestartRequested,
}

// ── BridgeHandle ─────────────────────────────────────────────────

/// Non-blocking submission side, safe to hold on any task or thread.
#[derive(Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<CommandEnvelope>,
}

impl BridgeHandle {
    /// Enqueue without waiting for the result. Fails when the queue is
    /// full or the bridge has stopped; never blocks.
    pub fn submit(&self, request: BridgeRequest) -> Result<(), CoreError> {
        self.command_tx
            .try_send(CommandEnvelope {
                request,
                response_tx: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => CoreError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => CoreError::BridgeStopped,
            })
    }
}

// ── Bridge ───────────────────────────────────────────────────────

/// Cheaply cloneable via `Arc<BridgeInner>`.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    health: Arc<HealthMonitor>,
    supervisor: Arc<ConnectionSupervisor>,
    store: Arc<DeviceStore>,
    router: CommandRouter,
    publisher: Arc<dyn StatePublisher>,
    names: Arc<dyn DeviceNames>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    started: AtomicBool,
    bus_error: AtomicBool,
    exit: watch::Sender<Option<ExitReason>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Create a bridge. Does NOT touch the bus: call
    /// [`start()`](Self::start) to connect, discover and spawn tasks.
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn BusTransport>,
        publisher: Arc<dyn StatePublisher>,
        names: Arc<dyn DeviceNames>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            transport,
            config.reconnect.clone(),
            Arc::clone(&health),
            cancel.child_token(),
        ));
        let store = Arc::new(DeviceStore::new());
        let router = CommandRouter::new(
            Arc::clone(&supervisor),
            Arc::clone(&store),
            config.level_retry.clone(),
        );
        let (command_tx, command_rx) = mpsc::channel(config.command_queue.max(1));
        let (exit, _) = watch::channel(None);

        Self {
            inner: Arc::new(BridgeInner {
                config,
                health,
                supervisor,
                store,
                router,
                publisher,
                names,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                started: AtomicBool::new(false),
                bus_error: AtomicBool::new(false),
                exit,
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.inner.health
    }

    pub fn directory(&self) -> Arc<FanoutDirectory> {
        self.inner.router.directory()
    }

    pub fn supervisor_status(&self) -> SupervisorStatus {
        self.inner.supervisor.status()
    }

    pub fn bus_error(&self) -> bool {
        self.inner.bus_error.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            command_tx: self.inner.command_tx.clone(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect, run the initial discovery, then spawn the command
    /// processor, the health notifier and the liveness probe.
    pub async fn start(&self) -> Result<DiscoveryReport, CoreError> {
        let Some(rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::Internal("bridge already started".into()));
        };

        if let Err(e) = self.inner.supervisor.connect().await {
            warn!(error = %e, "initial bus connection failed, will retry");
        }
        let report = self.discover().await?;

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(command_processor_task(self.clone(), rx)));
        handles.push(tokio::spawn(health_task(
            self.clone(),
            self.inner.cancel.child_token(),
        )));
        if !self.inner.config.probe_interval.is_zero() {
            handles.push(tokio::spawn(probe_task(
                self.clone(),
                self.inner.cancel.child_token(),
            )));
        }
        drop(handles);

        self.inner.started.store(true, Ordering::SeqCst);
        info!(
            devices = report.devices,
            groups = report.groups,
            "bridge started"
        );
        Ok(report)
    }

    /// Ask the bridge to stop. The first reason wins.
    pub fn stop(&self, reason: ExitReason) {
        let first = self.inner.exit.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(%reason, "bridge stopping");
        }
        self.inner.cancel.cancel();
    }

    /// Resolve once the bridge has been asked to stop.
    pub async fn wait(&self) -> ExitReason {
        let mut rx = self.inner.exit.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ExitReason::Shutdown),
            Err(_) => ExitReason::Shutdown,
        }
    }

    /// Stop background tasks, join them and release the bus.
    pub async fn shutdown(&self) {
        self.stop(ExitReason::Shutdown);
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        drop(handles);
        self.inner.supervisor.disconnect().await;
        debug!("bridge shut down");
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Submit a request and wait for its result.
    pub async fn execute(&self, request: BridgeRequest) -> Result<CommandResult, CoreError> {
        if !self.inner.started.load(Ordering::SeqCst) || self.inner.cancel.is_cancelled() {
            return Err(CoreError::BridgeStopped);
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                request,
                response_tx: Some(tx),
            })
            .await
            .map_err(|_| CoreError::BridgeStopped)?;

        rx.await.map_err(|_| CoreError::BridgeStopped)?
    }

    // ── Discovery ────────────────────────────────────────────────

    /// Full discovery pass: scan, reconcile each live address, read group
    /// memberships, rebuild the fan-out directory, apply to the store,
    /// then publish everything.
    pub async fn discover(&self) -> Result<DiscoveryReport, CoreError> {
        let inner = &self.inner;
        let supervisor = &inner.supervisor;
        info!("starting bus discovery");

        let live = scanner::scan(supervisor).await?;
        let mut records = Vec::with_capacity(live.len() + 17);
        for &address in &live {
            records.push(reconcile::reconcile(supervisor, &inner.config.level_retry, address).await);
        }
        let groups = scanner::scan_groups(supervisor, &live).await?;
        let directory = FanoutDirectory::rebuild(&live, groups);
        records.extend(
            directory
                .groups()
                .into_iter()
                .map(DeviceRecord::virtual_default),
        );
        records.push(DeviceRecord::virtual_default(Address::Broadcast));

        let group_count = directory.groups().len();
        inner.router.replace_directory(directory);
        let diff = inner.store.apply_discovery(records);

        for address in &diff.removed {
            let key = DeviceKey::from(*address);
            let result = inner.publisher.retract_discovery(&key).await;
            self.note_publish("retract discovery", result);
        }

        let snapshot = inner.store.snapshot();
        let entries: Vec<_> = snapshot
            .iter()
            .map(|r| (r.key.clone(), default_name(r.address)))
            .collect();
        if let Err(e) = inner.names.register(&entries) {
            warn!(error = %e, "could not update device names");
        }

        let result = inner.publisher.publish_availability(true).await;
        self.note_publish("availability", result);
        for record in snapshot.iter() {
            let name = display_name(inner.names.as_ref(), record);
            let result = inner.publisher.publish_discovery(record, &name).await;
            self.note_publish("discovery", result);
            let result = inner.publisher.publish_state(record).await;
            self.note_publish("state", result);
        }

        info!(
            devices = live.len(),
            groups = group_count,
            added = diff.added.len(),
            removed = diff.removed.len(),
            "discovery complete"
        );
        Ok(DiscoveryReport {
            devices: live.len(),
            groups: group_count,
            diff,
        })
    }

    // ── Publishing ───────────────────────────────────────────────

    /// Publish the retained bridge status document.
    pub async fn publish_bridge_status(&self) {
        let status = BridgeStatus {
            status: self.inner.health.status(),
            bus_error: self.bus_error(),
            timestamp: Utc::now(),
            health: self.inner.health.summary(),
        };
        let result = self.inner.publisher.publish_bridge_status(&status).await;
        self.note_publish("bridge status", result);
    }

    async fn publish_records(&self, records: Vec<Arc<DeviceRecord>>) {
        for record in &records {
            let result = self.inner.publisher.publish_state(record).await;
            self.note_publish("state", result);
        }
    }

    fn note_publish(&self, what: &str, result: Result<(), CoreError>) {
        match result {
            Ok(()) => self.inner.health.record_success(Channel::Publish),
            Err(e) => {
                warn!(what, error = %e, "publish failed");
                self.inner.health.record_failure(Channel::Publish);
            }
        }
    }

    // ── Request routing ──────────────────────────────────────────

    async fn route(&self, request: BridgeRequest) -> Result<CommandResult, CoreError> {
        match request {
            BridgeRequest::Apply { address, operation } => {
                match self.inner.router.apply(address, operation).await {
                    Ok(outcome) => {
                        let touched = std::iter::once(&outcome.primary)
                            .chain(&outcome.members)
                            .cloned()
                            .collect();
                        self.publish_records(touched).await;
                        Ok(CommandResult::Applied(outcome))
                    }
                    Err(e) => {
                        if e.is_validation() {
                            warn!(%address, %operation, error = %e, "request rejected");
                        } else {
                            error!(%address, %operation, error = %e, "request failed");
                        }
                        Err(e)
                    }
                }
            }
            BridgeRequest::Rescan => self.discover().await.map(CommandResult::Discovered),
            BridgeRequest::Restart => {
                warn!("restart requested");
                self.stop(ExitReason::RestartRequested);
                Ok(CommandResult::RestartRequested)
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Apply queued requests one at a time, in arrival order.
async fn command_processor_task(bridge: Bridge, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = bridge.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = bridge.route(envelope.request).await;
                if let Some(tx) = envelope.response_tx {
                    let _ = tx.send(result);
                }
            }
        }
    }
}

/// Publish the bridge status whenever the health status changes.
async fn health_task(bridge: Bridge, cancel: CancellationToken) {
    let health = Arc::clone(&bridge.inner.health);
    health
        .monitor(cancel, |_| {
            let bridge = bridge.clone();
            async move { bridge.publish_bridge_status().await }
        })
        .await;
}

/// Probe the bus periodically.
///
/// A framing error on the probe means the interface works but the bus has
/// no power: flagged once on the edge, reminded in the log, cleared on
/// recovery. A dead interface link while unhealthy for longer than
/// `restart_after` stops the bridge.
async fn probe_task(bridge: Bridge, cancel: CancellationToken) {
    let config = &bridge.inner.config;
    let supervisor = Arc::clone(&bridge.inner.supervisor);
    let started = Instant::now();
    let mut last_reminder = Instant::now();
    let mut interval = tokio::time::interval(config.probe_interval);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let response = supervisor
                    .send(Command::gear(PROBE_ADDRESS, Opcode::QueryControlGearPresent))
                    .await;
                match &response {
                    Ok(r) if r.is_framing_error() => {
                        if !bridge.inner.bus_error.swap(true, Ordering::SeqCst) {
                            error!("bus power failure detected");
                            last_reminder = Instant::now();
                            bridge.publish_bridge_status().await;
                        } else if last_reminder.elapsed() >= config.bus_error_reminder {
                            warn!("bus still without power");
                            last_reminder = Instant::now();
                        }
                    }
                    Ok(_) => {
                        if bridge.inner.bus_error.swap(false, Ordering::SeqCst) {
                            info!("bus power restored");
                            bridge.publish_bridge_status().await;
                        }
                    }
                    Err(e) => debug!(error = %e, "bus probe failed"),
                }

                if link_dead_for(&bridge, started) > config.restart_after {
                    error!(
                        restart_after_secs = config.restart_after.as_secs(),
                        "bus interface dead, restarting"
                    );
                    bridge.stop(ExitReason::TransportDead);
                    break;
                }
            }
        }
    }
}

/// How long the interface link has been unusable, zero while it works.
fn link_dead_for(bridge: &Bridge, started: Instant) -> Duration {
    let supervisor = &bridge.inner.supervisor;
    if bridge.inner.health.status() == HealthStatus::Online || supervisor.is_connected() {
        return Duration::ZERO;
    }
    supervisor
        .last_success()
        .map_or(started, |t| t.max(started))
        .elapsed()
}

#[cfg(test)]
mod tests {
    use dali2mqtt_bus::SimulatedBus;

    use super::*;
    use crate::publish::{NoNames, NullPublisher};

    fn assert_spawnable<F: std::future::Future + Send + 'static>(_: &F) {}

    #[tokio::test]
    async fn background_tasks_are_spawnable() {
        let bridge = Bridge::new(
            BridgeConfig::default(),
            Arc::new(SimulatedBus::new(Vec::new())),
            Arc::new(NullPublisher),
            Arc::new(NoNames),
        );
        let (_tx, rx) = mpsc::channel(1);

        let processor = command_processor_task(bridge.clone(), rx);
        assert_spawnable(&processor);
        let health = health_task(bridge.clone(), CancellationToken::new());
        assert_spawnable(&health);
    }
}
