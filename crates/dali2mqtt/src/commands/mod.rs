//! Command handlers.

pub mod config_cmd;
pub mod run;
pub mod scan;

use std::sync::Arc;

use tracing::info;

use dali2mqtt_bus::{BusTransport, SimulatedBus};
use dali2mqtt_config::{Config, DriverKind};

/// Build the bus transport selected by `dali.driver`.
pub fn transport(config: &Config) -> Arc<dyn BusTransport> {
    match config.dali.driver {
        DriverKind::Simulated => {
            info!(
                devices = config.dali.simulated_devices.len(),
                "using simulated DALI bus"
            );
            Arc::new(SimulatedBus::new(config.dali.simulated_devices.clone()))
        }
    }
}
