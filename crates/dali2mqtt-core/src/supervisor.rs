// ── Connection supervisor ──
//
// Sole owner of the bus transport. Every bus operation goes through here:
// it is serialised on the bus lock, preceded by a connectivity check that
// may trigger a bounded, exponentially backed-off reconnection, and
// reported to the health monitor exactly once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use dali2mqtt_bus::{BusTransport, Command, Response, Sequence, SequenceValue};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::error::CoreError;
use crate::health::{Channel, HealthMonitor};

// ── ConnectionState ──────────────────────────────────────────────

/// Transport connection state, owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot returned by [`ConnectionSupervisor::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub max_attempts: u32,
    pub can_retry: bool,
    pub transport: String,
}

// ── ConnectionSupervisor ─────────────────────────────────────────

pub struct ConnectionSupervisor {
    transport: Arc<dyn BusTransport>,
    policy: ReconnectPolicy,
    health: Arc<HealthMonitor>,
    /// Held for the duration of one bus operation.
    bus: Mutex<()>,
    /// Held for the duration of one reconnection procedure.
    reconnecting: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    last_success: StdMutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn BusTransport>,
        policy: ReconnectPolicy,
        health: Arc<HealthMonitor>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            policy,
            health,
            bus: Mutex::new(()),
            reconnecting: Mutex::new(()),
            state,
            attempts: AtomicU32::new(0),
            last_success: StdMutex::new(None),
            cancel,
        }
    }

    // ── Observers ────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// When the last bus operation succeeded, if ever.
    pub fn last_success(&self) -> Option<Instant> {
        *self
            .last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SupervisorStatus {
        let attempts = self.reconnect_attempts();
        SupervisorStatus {
            connected: self.is_connected(),
            reconnect_attempts: attempts,
            max_attempts: self.policy.max_attempts,
            can_retry: attempts < self.policy.max_attempts,
            transport: self.transport.name().to_owned(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Initial connection. Failures leave the supervisor disconnected; the
    /// first bus operation will go through the reconnection procedure.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.state.send_replace(ConnectionState::Connecting);
        match self.transport.connect().await {
            Ok(()) => {
                self.state.send_replace(ConnectionState::Connected);
                info!(transport = self.transport.name(), "bus interface connected");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "disconnect failed (ignored)");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Make sure the link is usable, reconnecting if it is not.
    ///
    /// With a liveness signal, waits up to `liveness_wait` for it; without
    /// one, trusts the connection state.
    pub async fn ensure_connected(&self) -> bool {
        let up = match self.transport.liveness() {
            Some(mut live) => matches!(
                tokio::time::timeout(self.policy.liveness_wait, live.wait_for(|up| *up)).await,
                Ok(Ok(_))
            ),
            None => self.is_connected(),
        };
        if up {
            self.attempts.store(0, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Connected);
            return true;
        }
        warn!("bus interface not live, reconnecting");
        self.state.send_replace(ConnectionState::Disconnected);
        self.reconnect().await
    }

    /// One reconnection attempt with exponential backoff.
    ///
    /// Never errors: returns `false` when the attempt failed, the cap is
    /// exhausted, or shutdown interrupted the backoff. At most one
    /// procedure runs at a time; a caller that queued behind another
    /// returns immediately if that one restored the link.
    pub async fn reconnect(&self) -> bool {
        let _guard = self.reconnecting.lock().await;
        if self.link_up() {
            return true;
        }

        let attempt = self.reconnect_attempts();
        if attempt >= self.policy.max_attempts {
            error!(max_attempts = self.policy.max_attempts, "max reconnection attempts reached");
            self.health.mark_offline();
            return false;
        }
        let attempt = attempt + 1;
        self.attempts.store(attempt, Ordering::SeqCst);
        self.health.mark_reconnecting();
        self.state.send_replace(ConnectionState::Connecting);

        let delay = self.policy.delay(attempt);
        info!(
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "attempting to reconnect"
        );
        if !self.pause(delay).await {
            self.state.send_replace(ConnectionState::Disconnected);
            return false;
        }

        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "error disconnecting interface (ignored)");
        }
        if !self.pause(self.policy.settle).await {
            self.state.send_replace(ConnectionState::Disconnected);
            return false;
        }

        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, attempt, "reconnection attempt failed");
            self.state.send_replace(ConnectionState::Disconnected);
            return false;
        }

        if let Some(mut live) = self.transport.liveness() {
            let ready = tokio::time::timeout(self.policy.reconnect_timeout, live.wait_for(|up| *up)).await;
            if !matches!(ready, Ok(Ok(_))) {
                warn!(attempt, "reconnection timed out waiting for interface");
                self.state.send_replace(ConnectionState::Disconnected);
                return false;
            }
        }

        info!(attempt, "bus interface reconnected");
        self.attempts.store(0, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connected);
        true
    }

    // ── Bus operations ───────────────────────────────────────────

    pub async fn send(&self, command: Command) -> Result<Response, CoreError> {
        let _bus = self.bus.lock().await;
        let result = match self.available().await {
            Ok(()) => self.transport.send(command).await.map_err(CoreError::from),
            Err(e) => Err(e),
        };
        self.record(result.as_ref().err());
        result
    }

    /// Several frames back to back with nothing interleaved, e.g. a DTR
    /// load followed by a configuration command sent twice.
    pub async fn send_batch(&self, commands: &[Command]) -> Result<Vec<Response>, CoreError> {
        let _bus = self.bus.lock().await;
        let result = match self.available().await {
            Ok(()) => {
                let mut responses = Vec::with_capacity(commands.len());
                let mut failure = None;
                for command in commands {
                    match self.transport.send(*command).await {
                        Ok(r) => responses.push(r),
                        Err(e) => {
                            failure = Some(CoreError::from(e));
                            break;
                        }
                    }
                }
                failure.map_or(Ok(responses), Err)
            }
            Err(e) => Err(e),
        };
        self.record(result.as_ref().err());
        result
    }

    pub async fn run_sequence(&self, sequence: &Sequence) -> Result<SequenceValue, CoreError> {
        let _bus = self.bus.lock().await;
        let result = match self.available().await {
            Ok(()) => self
                .transport
                .run_sequence(sequence)
                .await
                .map_err(CoreError::from),
            Err(e) => Err(e),
        };
        self.record(result.as_ref().err());
        result
    }

    // ── Private helpers ──────────────────────────────────────────

    async fn available(&self) -> Result<(), CoreError> {
        if self.ensure_connected().await {
            return Ok(());
        }
        let attempts = self.reconnect_attempts();
        if attempts >= self.policy.max_attempts {
            Err(CoreError::ReconnectExhausted { attempts })
        } else {
            Err(CoreError::ConnectivityLost {
                reason: format!("reconnection attempt {attempts} failed"),
            })
        }
    }

    fn record(&self, error: Option<&CoreError>) {
        match error {
            None => {
                *self
                    .last_success
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
                self.health.record_success(Channel::Bus);
            }
            Some(e) => {
                if e.is_connectivity() {
                    self.state.send_replace(ConnectionState::Disconnected);
                }
                self.health.record_failure(Channel::Bus);
            }
        }
    }

    fn link_up(&self) -> bool {
        match self.transport.liveness() {
            Some(live) => *live.borrow(),
            None => self.is_connected(),
        }
    }

    /// Sleep unless shutdown fires first. Returns `false` when cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dali2mqtt_bus::{Address, Opcode, SimulatedBus, VirtualGear};

    use super::*;
    use crate::config::HealthConfig;
    use crate::health::HealthStatus;

    fn supervisor(sim: &Arc<SimulatedBus>) -> (ConnectionSupervisor, Arc<HealthMonitor>, CancellationToken) {
        let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let cancel = CancellationToken::new();
        let transport: Arc<dyn BusTransport> = sim.clone();
        let sup = ConnectionSupervisor::new(
            transport,
            ReconnectPolicy::default(),
            Arc::clone(&health),
            cancel.clone(),
        );
        (sup, health, cancel)
    }

    fn present(id: u8) -> Command {
        Command::gear(Address::Individual(id), Opcode::QueryControlGearPresent)
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delay_doubles_per_attempt_and_resets_on_success() {
        let sim = Arc::new(SimulatedBus::new(vec![]));
        let (sup, _, _) = supervisor(&sim);
        sim.fail_next_connects(2);

        let started = Instant::now();
        assert!(!sup.reconnect().await);
        assert_eq!(started.elapsed(), Duration::from_secs(2 + 1));
        assert_eq!(sup.reconnect_attempts(), 1);

        let started = Instant::now();
        assert!(!sup.reconnect().await);
        assert_eq!(started.elapsed(), Duration::from_secs(4 + 1));
        assert_eq!(sup.reconnect_attempts(), 2);

        let started = Instant::now();
        assert!(sup.reconnect().await);
        assert_eq!(started.elapsed(), Duration::from_secs(8 + 1));
        assert_eq!(sup.reconnect_attempts(), 0);
        assert_eq!(sup.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_never_exceed_cap() {
        let sim = Arc::new(SimulatedBus::new(vec![]));
        sim.set_link(false);
        let (sup, health, _) = supervisor(&sim);

        for _ in 0..8 {
            assert!(!sup.reconnect().await);
            assert!(sup.reconnect_attempts() <= 5);
        }
        assert_eq!(sup.reconnect_attempts(), 5);
        assert!(!sup.status().can_retry);
        assert_eq!(health.status(), HealthStatus::Offline);

        // Once exhausted, operations fail fast with ReconnectExhausted.
        let started = Instant::now();
        let err = sup.send(present(0)).await.unwrap_err();
        assert!(matches!(err, CoreError::ReconnectExhausted { attempts: 5 }));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_reconnection_runs_at_a_time() {
        let sim = Arc::new(SimulatedBus::new(vec![]));
        let (sup, _, _) = supervisor(&sim);

        let (a, b) = tokio::join!(sup.reconnect(), sup.reconnect());
        assert!(a && b);
        assert_eq!(sim.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let sim = Arc::new(SimulatedBus::new(vec![]));
        let (sup, _, cancel) = supervisor(&sim);
        cancel.cancel();

        let started = Instant::now();
        assert!(!sup.reconnect().await);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(sim.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_reconnects_transparently_after_link_loss() {
        let sim = Arc::new(SimulatedBus::new(vec![VirtualGear::new(0)]));
        let (sup, health, _) = supervisor(&sim);
        sup.connect().await.unwrap();

        sim.set_link(false);
        sim.set_link(true);
        let r = sup.send(present(0)).await.unwrap();
        assert!(r.is_yes());
        assert_eq!(sim.connect_count(), 2);
        assert_eq!(sup.reconnect_attempts(), 0);
        assert_eq!(health.status(), HealthStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn health_is_recorded_once_per_call() {
        let sim = Arc::new(SimulatedBus::new(vec![VirtualGear::new(0)]));
        let (sup, health, _) = supervisor(&sim);
        sup.connect().await.unwrap();
        sim.set_timeout(0, true);

        sup.send(present(0)).await.unwrap_err();
        sup.send(present(0)).await.unwrap_err();
        assert_eq!(health.summary().bus_failures, 2);
        assert_eq!(health.status(), HealthStatus::Online);

        sup.send(present(0)).await.unwrap_err();
        assert_eq!(health.status(), HealthStatus::Degraded);

        sim.set_timeout(0, false);
        sup.send(present(0)).await.unwrap();
        assert_eq!(health.status(), HealthStatus::Online);
        assert!(sup.last_success().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_one_health_sample() {
        let sim = Arc::new(SimulatedBus::new(vec![VirtualGear::new(1)]));
        let (sup, health, _) = supervisor(&sim);
        sup.connect().await.unwrap();

        let a = Address::Individual(1);
        let out = sup
            .send_batch(&[
                Command::dtr0(3),
                Command::gear(a, Opcode::SetFadeTime),
                Command::gear(a, Opcode::SetFadeTime),
            ])
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(sim.gear(1).unwrap().fade_time, 3);
        assert_eq!(health.summary().bus_failures, 0);
    }

    #[test]
    fn status_reports_transport_name() {
        let sim = Arc::new(SimulatedBus::new(vec![]));
        let (sup, _, _) = supervisor(&sim);
        let s = sup.status();
        assert_eq!(s.transport, "simulated");
        assert!(!s.connected);
        assert!(s.can_retry);
        assert_eq!(s.max_attempts, 5);
    }
}
