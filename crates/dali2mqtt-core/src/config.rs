// ── Runtime bridge configuration ──
//
// These types describe *how* the bridge runs: retry timing, health
// thresholds, and probe cadence. They never touch disk. The binary builds
// a `BridgeConfig` from its loaded settings and hands it in.

use std::time::Duration;

/// Reconnection timing for the connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts allowed before the supervisor reports exhaustion.
    pub max_attempts: u32,
    /// Unit of the exponential backoff: attempt `k` waits `base * 2^k`.
    pub base: Duration,
    /// Ceiling on a single backoff wait.
    pub max_delay: Duration,
    /// Pause between disconnecting and reconnecting.
    pub settle: Duration,
    /// How long `ensure_connected` waits for the liveness signal.
    pub liveness_wait: Duration,
    /// How long a reconnect waits for the liveness signal.
    pub reconnect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            settle: Duration::from_secs(1),
            liveness_wait: Duration::from_secs(1),
            reconnect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Wait before attempt `attempt` (1-based): `min(base * 2^attempt, max_delay)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

/// Retry timing for actual-level reads that answer MASK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRetryPolicy {
    /// Waits between attempts during discovery; one more attempt than waits.
    pub discovery_delays: Vec<Duration>,
    /// Extra wait before the first attempt when the status byte reports a
    /// running fade.
    pub fade_wait: Duration,
    /// Attempts for an on-demand level refresh.
    pub refresh_attempts: u32,
    /// Wait between on-demand refresh attempts.
    pub refresh_delay: Duration,
}

impl Default for LevelRetryPolicy {
    fn default() -> Self {
        Self {
            discovery_delays: vec![Duration::from_millis(200), Duration::from_millis(400)],
            fade_wait: Duration::from_millis(500),
            refresh_attempts: 2,
            refresh_delay: Duration::from_millis(200),
        }
    }
}

impl LevelRetryPolicy {
    pub fn discovery_attempts(&self) -> usize {
        self.discovery_delays.len() + 1
    }
}

/// Health monitoring thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Cadence of the edge-triggered status loop. Also the staleness unit:
    /// a channel is stale after `2 * check_interval` without success.
    pub check_interval: Duration,
    /// Consecutive failures on one channel before Online becomes Degraded.
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            failure_threshold: 3,
        }
    }
}

/// Everything the bridge needs at runtime.
///
/// Built by the CLI, passed to `Bridge`: core never reads config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub reconnect: ReconnectPolicy,
    pub level_retry: LevelRetryPolicy,
    pub health: HealthConfig,
    /// Cadence of the bus liveness probe. Zero disables it.
    pub probe_interval: Duration,
    /// How long the transport link may stay dead before the bridge stops.
    pub restart_after: Duration,
    /// How often an ongoing bus power failure is repeated in the log.
    pub bus_error_reminder: Duration,
    /// Depth of the inbound request queue.
    pub command_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            level_retry: LevelRetryPolicy::default(),
            health: HealthConfig::default(),
            probe_interval: Duration::from_secs(60),
            restart_after: Duration::from_secs(120),
            bus_error_reminder: Duration::from_secs(300),
            command_queue: 64,
        }
    }
}
