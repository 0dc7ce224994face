//! `defaults` and `validate` commands.

use std::path::PathBuf;

use clap::Args;
use roi_graph_core::Config;
use serde_json::Map;
use tracing::info;

use super::load_config;
use crate::error::{exit_code_for_error, CliExitCode};
use crate::logging;

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Print the full default configuration as TOML.
pub fn handle_defaults() -> i32 {
    match Config::default().to_toml_string() {
        Ok(text) => {
            print!("{}", text);
            CliExitCode::Success as i32
        }
        Err(e) => {
            eprintln!("error: {}", e);
            CliExitCode::Failure as i32
        }
    }
}

/// Load and validate a configuration file, layered over the defaults.
pub fn handle_validate(args: ValidateArgs, verbose: u8) -> i32 {
    match load_config(Some(&args.config), Map::new()) {
        Ok(config) => {
            logging::init(verbose, &config.logging.level, config.logging.include_location);
            info!(path = %args.config.display(), "Configuration is valid");
            println!(
                "OK: {} (seed {}, pruning {:?}, max_trials {})",
                args.config.display(),
                config.general.random_seed,
                config.pruning,
                config.clustering.automatic_mixing.find_parameters.max_trials
            );
            CliExitCode::Success as i32
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit_code_for_error(&e) as i32
        }
    }
}
