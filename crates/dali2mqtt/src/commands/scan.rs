//! `scan`: one-shot discovery without MQTT.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;

use dali2mqtt_config::{Config, DevicesNames};
use dali2mqtt_core::{Bridge, DeviceNames, NoNames, NullPublisher};

use crate::cli::ScanArgs;
use crate::error::CliError;
use crate::output;

pub async fn handle(config: &Config, args: &ScanArgs) -> Result<(), CliError> {
    // Only read names that already exist; a scan never creates the file.
    let names: Arc<dyn DeviceNames> = if config.devices_names_file.exists() {
        Arc::new(DevicesNames::load(&config.devices_names_file)?)
    } else {
        Arc::new(NoNames)
    };

    let mut bridge_config = config.to_bridge_config();
    bridge_config.probe_interval = Duration::ZERO;
    let bridge = Bridge::new(
        bridge_config,
        super::transport(config),
        Arc::new(NullPublisher),
        Arc::clone(&names),
    );

    let started = bridge.start().await;
    let records = bridge.store().snapshot();
    bridge.shutdown().await;
    let report = started?;

    let rendered = output::render_devices(args.output, &records, names.as_ref())?;
    output::print_output(&rendered);

    let summary = format!("{} devices, {} groups", report.devices, report.groups);
    if std::io::stderr().is_terminal() {
        eprintln!("{}", summary.bold());
    } else {
        eprintln!("{summary}");
    }
    Ok(())
}
