//! `synth` command: write a synthetic dataset to disk.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use roi_graph_core::data::{generate_sessions, write_sessions};
use serde_json::{json, Map};
use tracing::info;

use super::{load_config, set_path};
use crate::error::{exit_code_for_error, CliExitCode};
use crate::logging;

/// Arguments for the synth command.
#[derive(Args, Debug)]
pub struct SynthArgs {
    /// Directory receiving one JSON file per session
    #[arg(short, long)]
    pub output: PathBuf,

    /// TOML configuration file (uses `data_loading.synthetic`)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override `general.random_seed`
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override `data_loading.synthetic.n_sessions`
    #[arg(long)]
    pub n_sessions: Option<usize>,
}

pub fn handle_synth(args: SynthArgs, verbose: u8) -> i32 {
    match run(&args, verbose) {
        Ok(n) => {
            println!("Wrote {} session files to {}", n, args.output.display());
            CliExitCode::Success as i32
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit_code_for_error(&e) as i32
        }
    }
}

fn run(args: &SynthArgs, verbose: u8) -> anyhow::Result<usize> {
    let mut overrides = Map::new();
    if let Some(seed) = args.seed {
        set_path(&mut overrides, "general.random_seed", json!(seed));
    }
    if let Some(n) = args.n_sessions {
        set_path(&mut overrides, "data_loading.synthetic.n_sessions", json!(n));
    }
    let config = load_config(args.config.as_deref(), overrides)?;
    logging::init(verbose, &config.logging.level, config.logging.include_location);

    let generated = generate_sessions(&config.data_loading.synthetic, config.general.random_seed)
        .context("generating synthetic sessions")?;
    let paths = write_sessions(&args.output, &generated.sessions)
        .with_context(|| format!("writing sessions to {}", args.output.display()))?;
    info!(n_files = paths.len(), dir = %args.output.display(), "Wrote synthetic sessions");
    Ok(paths.len())
}
