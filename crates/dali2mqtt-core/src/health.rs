// ── Health monitor ──
//
// Aggregates success/failure signals from two independent channels (bus
// operations and outbound publishes) into a coarse status. A background
// loop reports status changes edge-triggered: once per change, never
// repeated for an unchanged status.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::HealthConfig;

/// Coarse bridge status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Online,
    Degraded,
    Offline,
    Reconnecting,
}

/// Independent signal sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    Bus,
    Publish,
}

#[derive(Debug)]
struct ChannelState {
    consecutive_failures: u32,
    last_success: Instant,
}

impl ChannelState {
    fn new(now: Instant) -> Self {
        Self {
            consecutive_failures: 0,
            last_success: now,
        }
    }
}

#[derive(Debug)]
struct Counters {
    bus: ChannelState,
    publish: ChannelState,
}

impl Counters {
    fn channel(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::Bus => &mut self.bus,
            Channel::Publish => &mut self.publish,
        }
    }
}

/// Point-in-time health report, published with every status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub bus_ok: bool,
    pub publish_ok: bool,
    pub bus_failures: u32,
    pub publish_failures: u32,
    pub secs_since_bus: u64,
    pub secs_since_publish: u64,
    pub issues: Vec<String>,
}

pub struct HealthMonitor {
    config: HealthConfig,
    counters: Mutex<Counters>,
    status: watch::Sender<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let now = Instant::now();
        let (status, _) = watch::channel(HealthStatus::Online);
        Self {
            config,
            counters: Mutex::new(Counters {
                bus: ChannelState::new(now),
                publish: ChannelState::new(now),
            }),
            status,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> HealthStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status.subscribe()
    }

    fn transition(&self, to: HealthStatus) {
        let from = self.status.send_replace(to);
        if from != to {
            info!(%from, %to, "health status changed");
        }
    }

    // ── Signals ──────────────────────────────────────────────────────

    /// Reset the channel's failure streak. Any non-Online status recovers
    /// to Online.
    pub fn record_success(&self, channel: Channel) {
        {
            let mut counters = self.lock();
            let state = counters.channel(channel);
            state.consecutive_failures = 0;
            state.last_success = Instant::now();
        }

        if self.status() != HealthStatus::Online {
            info!(%channel, "connectivity recovered");
            self.transition(HealthStatus::Online);
        }
    }

    /// Extend the channel's failure streak; Online becomes Degraded once
    /// the streak reaches the threshold.
    pub fn record_failure(&self, channel: Channel) {
        let failures = {
            let mut counters = self.lock();
            let state = counters.channel(channel);
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.consecutive_failures
        };
        if failures >= self.config.failure_threshold {
            warn!(%channel, failures, "consecutive failures");
            if self.status() == HealthStatus::Online {
                self.transition(HealthStatus::Degraded);
            }
        }
    }

    /// The connection supervisor started a reconnection procedure.
    pub fn mark_reconnecting(&self) {
        self.transition(HealthStatus::Reconnecting);
    }

    /// Connection lost with no recovery in sight.
    pub fn mark_offline(&self) {
        self.transition(HealthStatus::Offline);
    }

    // ── Reporting ────────────────────────────────────────────────────

    /// Status plus a staleness view: a channel is not ok once its last
    /// success is older than `2 * check_interval`, whatever the counters say.
    pub fn summary(&self) -> HealthSummary {
        let now = Instant::now();
        let stale_after = self.config.check_interval * 2;
        let counters = self.lock();
        let since_bus = now.saturating_duration_since(counters.bus.last_success);
        let since_publish = now.saturating_duration_since(counters.publish.last_success);
        let bus_ok = since_bus <= stale_after;
        let publish_ok = since_publish <= stale_after;

        let mut issues = Vec::new();
        if !bus_ok {
            issues.push(format!(
                "DALI: no successful commands in last {}s",
                since_bus.as_secs()
            ));
        }
        if !publish_ok {
            issues.push(format!(
                "MQTT: no successful publishes in last {}s",
                since_publish.as_secs()
            ));
        }
        if issues.is_empty() {
            issues.push("System operational".into());
        }

        HealthSummary {
            status: self.status(),
            bus_ok,
            publish_ok,
            bus_failures: counters.bus.consecutive_failures,
            publish_failures: counters.publish.consecutive_failures,
            secs_since_bus: since_bus.as_secs(),
            secs_since_publish: since_publish.as_secs(),
            issues,
        }
    }

    /// Poll the status every `check_interval` and call `on_change` whenever
    /// it differs from the last reported one. Runs until `cancel` fires.
    pub async fn monitor<F, Fut>(&self, cancel: CancellationToken, mut on_change: F)
    where
        F: FnMut(HealthStatus) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut reported = self.status();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.check_interval) => {
                    let current = self.status();
                    if current != reported {
                        warn!(from = %reported, to = %current, "bridge status changed");
                        on_change(current).await;
                        reported = current;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(HealthConfig::default())
    }

    #[test]
    fn three_bus_failures_degrade_and_one_success_recovers() {
        let h = monitor();
        h.record_failure(Channel::Bus);
        h.record_failure(Channel::Bus);
        assert_eq!(h.status(), HealthStatus::Online);
        h.record_failure(Channel::Bus);
        assert_eq!(h.status(), HealthStatus::Degraded);
        h.record_success(Channel::Bus);
        assert_eq!(h.status(), HealthStatus::Online);
    }

    #[test]
    fn success_on_either_channel_recovers() {
        let h = monitor();
        for _ in 0..3 {
            h.record_failure(Channel::Publish);
        }
        assert_eq!(h.status(), HealthStatus::Degraded);
        h.record_success(Channel::Bus);
        assert_eq!(h.status(), HealthStatus::Online);

        // The publish streak is untouched: the next failure degrades again.
        h.record_failure(Channel::Publish);
        assert_eq!(h.status(), HealthStatus::Degraded);
    }

    #[test]
    fn failures_only_degrade_from_online() {
        let h = monitor();
        h.mark_reconnecting();
        for _ in 0..5 {
            h.record_failure(Channel::Bus);
        }
        assert_eq!(h.status(), HealthStatus::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn summary_flags_stale_channels() {
        let h = monitor();
        assert!(h.summary().bus_ok);
        tokio::time::advance(Duration::from_secs(61)).await;
        h.record_success(Channel::Publish);
        let s = h.summary();
        assert!(!s.bus_ok);
        assert!(s.publish_ok);
        assert_eq!(s.secs_since_bus, 61);
        assert_eq!(s.issues.len(), 1);
        assert!(s.issues[0].starts_with("DALI"));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_reports_each_change_once() {
        let h = Arc::new(monitor());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let task = {
            let h = Arc::clone(&h);
            let seen = Arc::clone(&seen);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                h.monitor(cancel, |status| {
                    let seen = Arc::clone(&seen);
                    async move { seen.lock().unwrap().push(status) }
                })
                .await;
            })
        };

        // Let the monitor take its baseline before anything changes.
        tokio::time::sleep(Duration::from_secs(1)).await;
        for _ in 0..3 {
            h.record_failure(Channel::Bus);
        }
        // Three check intervals with the same status: reported once.
        tokio::time::sleep(Duration::from_secs(95)).await;
        h.record_success(Channel::Bus);
        tokio::time::sleep(Duration::from_secs(30)).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![HealthStatus::Degraded, HealthStatus::Online]
        );
    }
}
