//! Clap derive structures for the `dali2mqtt` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use dali2mqtt_config::{Config, DriverKind};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// dali2mqtt -- DALI lighting bus to MQTT bridge
#[derive(Debug, Parser)]
#[command(
    name = "dali2mqtt",
    version,
    about = "Bridge a DALI lighting bus to MQTT",
    long_about = "Discovers control gear on a DALI bus, mirrors its state to an MQTT broker\n\
        and announces every light to Home Assistant through MQTT discovery.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default)
    Table,
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run(RunArgs),

    /// Discover the bus once and print what was found
    Scan(ScanArgs),

    /// Inspect the configuration
    #[command(alias = "cfg")]
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// MQTT broker host
    #[arg(long)]
    pub mqtt_server: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    pub mqtt_port: Option<u16>,

    /// MQTT username
    #[arg(long)]
    pub mqtt_username: Option<String>,

    /// MQTT password
    #[arg(long)]
    pub mqtt_password: Option<String>,

    /// Root of every topic the bridge uses
    #[arg(long)]
    pub mqtt_base_topic: Option<String>,

    /// Home Assistant discovery prefix
    #[arg(long)]
    pub ha_discovery_prefix: Option<String>,

    /// YAML file with friendly device names
    #[arg(long)]
    pub devices_names_file: Option<PathBuf>,

    /// Bus interface driver
    #[arg(long)]
    pub dali_driver: Option<DriverKind>,
}

impl RunArgs {
    /// Apply flags on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref server) = self.mqtt_server {
            config.mqtt.server.clone_from(server);
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(ref username) = self.mqtt_username {
            config.mqtt.username = Some(username.clone());
        }
        if let Some(ref password) = self.mqtt_password {
            config.mqtt.password = Some(password.clone().into());
        }
        if let Some(ref base) = self.mqtt_base_topic {
            config.mqtt.base_topic.clone_from(base);
        }
        if let Some(ref prefix) = self.ha_discovery_prefix {
            config.ha_discovery_prefix.clone_from(prefix);
        }
        if let Some(ref path) = self.devices_names_file {
            config.devices_names_file.clone_from(path);
        }
        if let Some(driver) = self.dali_driver {
            config.dali.driver = driver;
        }
    }
}

// ── Scan ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputFormat,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (password redacted)
    Show,

    /// Print the configuration file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
