//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(dali2mqtt_config::config_path);
            output::print_output(&path.display().to_string());
            Ok(())
        }
        ConfigCommand::Show => {
            let config = dali2mqtt_config::load_config(global.config.as_deref())?;
            output::print_output(config.to_redacted_toml()?.trim_end());
            Ok(())
        }
    }
}
