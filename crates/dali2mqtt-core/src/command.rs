// ── Command API ──
//
// Every inbound request flows through `BridgeRequest` into the bridge's
// command processor, which applies them to the bus one at a time, in
// arrival order.

use std::sync::Arc;

use dali2mqtt_bus::Address;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::oneshot;

use crate::error::CoreError;
use crate::model::DeviceRecord;
use crate::store::DiscoveryDiff;

/// Something to do to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case", tag = "op", content = "value")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    /// Direct arc power. `0` turns the lamp off with fade.
    SetLevel(u8),
    /// Immediate off.
    Off,
    /// Restore the last non-zero level, or max level.
    TurnOn,
    /// Colour temperature in mired.
    SetColorTemperature(u16),
    SetFadeTime(u8),
    SetFadeRate(u8),
    /// Re-read the actual level of an individual address.
    RefreshLevel,
}

/// A request handed to the bridge from outside the bus context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeRequest {
    Apply { address: Address, operation: Operation },
    /// Run a full discovery pass again.
    Rescan,
    /// Stop the bridge so the process supervisor restarts it.
    Restart,
}

/// What an applied operation changed.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// The addressed record after the operation.
    pub primary: Arc<DeviceRecord>,
    /// Member records updated locally for a group or broadcast command.
    pub members: Vec<Arc<DeviceRecord>>,
}

/// Summary of a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub devices: usize,
    pub groups: usize,
    pub diff: DiscoveryDiff,
}

/// Result of a processed [`BridgeRequest`].
#[derive(Debug, Clone)]
pub enum CommandResult {
    Applied(CommandOutcome),
    Discovered(DiscoveryReport),
    RestartRequested,
}

/// A request plus an optional reply channel. Fire-and-forget submissions
/// from the message bus carry no reply channel.
pub(crate) struct CommandEnvelope {
    pub request: BridgeRequest,
    pub response_tx: Option<oneshot::Sender<Result<CommandResult, CoreError>>>,
}
