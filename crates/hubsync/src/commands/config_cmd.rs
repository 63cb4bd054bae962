//! Config command handlers.

use hubsync_config::{ConfigError, config_path, load_config_from};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);
    let config_error = |source: ConfigError| CliError::Config {
        path: path.display().to_string(),
        source,
    };

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommand::Show { check } => {
            let config = load_config_from(&path).map_err(config_error)?;
            if check {
                config.to_sync_config().map_err(config_error)?;
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
