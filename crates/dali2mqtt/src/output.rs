//! Output formatting: table, JSON, YAML.
//!
//! Table uses `tabled`, structured formats serialize the records via serde.

use std::io::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use dali2mqtt_core::{DeviceNames, DeviceRecord, display_name};

use crate::cli::OutputFormat;
use crate::error::CliError;

// ── Device rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "Level")]
    level: u8,
    #[tabled(rename = "Range")]
    range: String,
    #[tabled(rename = "Fade")]
    fade: String,
    #[tabled(rename = "Colour (mired)")]
    colour: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Firmware")]
    firmware: String,
}

impl DeviceRow {
    fn new(record: &DeviceRecord, name: String) -> Self {
        let colour = record.color_temperature.map_or_else(
            || "-".to_owned(),
            |ct| format!("{} ({}-{})", ct.current, ct.coolest, ct.warmest),
        );
        Self {
            key: record.key.to_string(),
            name,
            device_type: record.metadata.device_type.clone(),
            level: record.level,
            range: format!("{}-{}", record.limits.min_level, record.limits.max_level),
            fade: format!("{}/{}", record.fade.time, record.fade.rate),
            colour,
            model: record.metadata.model().to_owned(),
            firmware: record
                .metadata
                .firmware_version
                .clone()
                .unwrap_or_else(|| "-".into()),
        }
    }
}

/// A record with its display name, for structured output.
#[derive(Serialize)]
struct NamedRecord<'a> {
    name: String,
    #[serde(flatten)]
    record: &'a DeviceRecord,
}

// ── Render dispatchers ───────────────────────────────────────────────

pub fn render_devices(
    format: OutputFormat,
    records: &[Arc<DeviceRecord>],
    names: &dyn DeviceNames,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<DeviceRow> = records
                .iter()
                .map(|r| DeviceRow::new(r, display_name(names, r)))
                .collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let named: Vec<NamedRecord<'_>> = records
                .iter()
                .map(|r| NamedRecord {
                    name: display_name(names, r),
                    record: r,
                })
                .collect();
            if format == OutputFormat::Json {
                Ok(serde_json::to_string_pretty(&named)?)
            } else {
                Ok(serde_yaml::to_string(&named)?)
            }
        }
    }
}

/// Print the rendered output to stdout.
pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
