//! Bus discovery, state reconciliation and connection supervision for the
//! DALI to MQTT bridge.
//!
//! - **[`Bridge`]**: facade owning the bus-side lifecycle.
//!   [`start()`](Bridge::start) connects, runs discovery, then spawns the
//!   command processor, the health notifier and the liveness probe.
//!   Inbound requests arrive through a bounded `mpsc` channel, either
//!   awaited ([`Bridge::execute`]) or fire-and-forget
//!   ([`BridgeHandle::submit`]), and are applied to the bus strictly in
//!   order.
//!
//! - **[`ConnectionSupervisor`]**: sole owner of the [`BusTransport`].
//!   Serialises bus access, reconnects with capped exponential backoff and
//!   reports every operation to the [`HealthMonitor`] exactly once.
//!
//! - **Discovery** ([`scanner`], [`reconcile`]): confirmed presence scan,
//!   group bitmask reads and per-field fault-tolerant record building.
//!
//! - **[`CommandRouter`]** and **[`FanoutDirectory`]**: validation before
//!   I/O, one bus command per request, local fan-out of group and broadcast
//!   commands to member records.
//!
//! - **[`DeviceStore`]**: reactive record storage built on `DashMap` and
//!   `tokio::sync::watch`.
//!
//! [`BusTransport`]: dali2mqtt_bus::BusTransport

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod fanout;
pub mod health;
pub mod model;
pub mod publish;
pub mod reconcile;
pub mod router;
pub mod scanner;
pub mod store;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, BridgeHandle, ExitReason};
pub use command::{BridgeRequest, CommandOutcome, CommandResult, DiscoveryReport, Operation};
pub use config::{BridgeConfig, HealthConfig, LevelRetryPolicy, ReconnectPolicy};
pub use error::CoreError;
pub use fanout::FanoutDirectory;
pub use health::{Channel, HealthMonitor, HealthStatus, HealthSummary};
pub use publish::{
    BridgeStatus, DeviceNames, NoNames, NullPublisher, StatePublisher, display_name,
};
pub use router::CommandRouter;
pub use store::{DeviceStore, DiscoveryDiff};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorStatus};

pub use model::{
    ColorTemperature, DeviceKey, DeviceMetadata, DeviceRecord, Fade, LevelLimits, LifecycleState,
    default_name,
};
