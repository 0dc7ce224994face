//! ROI Graph CLI
//!
//! Command-line front end for cross-session ROI tracking.
//!
//! # Commands
//!
//! - `track`: run the pipeline and write `results.json`, `run_data.json`
//!   and `run_data_hashes.json`
//! - `defaults`: print the default configuration as TOML
//! - `validate`: check a configuration file
//! - `synth`: write a synthetic dataset as session files
//!
//! Exit code 0 on success, 1 when the pipeline fails, 2 for invalid
//! configuration or input.

use clap::{Parser, Subcommand};

mod commands;
mod error;
mod logging;

pub use error::{exit_code_for_error, CliExitCode};

/// ROI Graph CLI - cross-session ROI tracking
#[derive(Parser)]
#[command(name = "roi-graph")]
#[command(version)]
#[command(about = "Track ROIs across imaging sessions by fusing similarities and clustering")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracking pipeline
    ///
    /// Configuration is layered: defaults, then the TOML file, then
    /// ROI_GRAPH__SECTION__KEY environment variables, then flags.
    Track(commands::track::TrackArgs),
    /// Print the default configuration as TOML
    Defaults,
    /// Validate a configuration file
    Validate(commands::config::ValidateArgs),
    /// Write a synthetic dataset as one JSON file per session
    Synth(commands::synth::SynthArgs),
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Track(args) => commands::track::handle_track(args, cli.verbose),
        Commands::Defaults => commands::config::handle_defaults(),
        Commands::Validate(args) => commands::config::handle_validate(args, cli.verbose),
        Commands::Synth(args) => commands::synth::handle_synth(args, cli.verbose),
    };

    std::process::exit(exit_code);
}
