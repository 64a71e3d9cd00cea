mod cli;
mod commands;
mod discovery;
mod error;
mod mqtt;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dali2mqtt_config::LogLevel;

use crate::cli::{Cli, Command, GlobalOpts, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Filter used when `RUST_LOG` is unset: the configured level, raised by
/// each `-v`. The MQTT client is kept quiet below trace.
fn default_directive(verbose: u8, level: LogLevel) -> String {
    let base = match verbose {
        0 => level.directive(),
        1 => "debug",
        _ => return "trace".to_owned(),
    };
    format!("{base},rumqttc=warn")
}

fn init_tracing(global: &GlobalOpts, level: LogLevel, color: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(global.verbose, level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match global.log_format {
        LogFormat::Text => builder.with_ansi(color).init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "dali2mqtt", &mut std::io::stdout());
            Ok(())
        }

        // Config commands report problems instead of acting on them
        Command::Config(ref args) => {
            init_tracing(&cli.global, LogLevel::Warning, false);
            commands::config_cmd::handle(args, &cli.global)
        }

        Command::Scan(ref args) => {
            let config = dali2mqtt_config::load_config(cli.global.config.as_deref())?;
            init_tracing(&cli.global, config.log_level, config.log_color);
            commands::scan::handle(&config, args).await
        }

        Command::Run(ref args) => {
            let mut config = dali2mqtt_config::load_config(cli.global.config.as_deref())?;
            args.apply(&mut config);
            config.validate()?;
            init_tracing(&cli.global, config.log_level, config.log_color);
            tracing::debug!(config = ?config, "configuration loaded");
            commands::run::handle(config).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_configured_level() {
        assert_eq!(default_directive(0, LogLevel::Info), "info,rumqttc=warn");
        assert_eq!(default_directive(0, LogLevel::Critical), "error,rumqttc=warn");
        assert_eq!(default_directive(1, LogLevel::Warning), "debug,rumqttc=warn");
        assert_eq!(default_directive(3, LogLevel::Info), "trace");
    }
}
