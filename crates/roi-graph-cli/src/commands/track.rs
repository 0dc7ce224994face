//! `track` command: run the pipeline and write its outputs.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use roi_graph_core::PipelineOrchestrator;
use serde_json::{json, Map};
use tracing::info;

use super::{load_config, set_path};
use crate::error::{exit_code_for_error, CliExitCode};
use crate::logging;

/// Arguments for the track command.
#[derive(Args, Debug)]
pub struct TrackArgs {
    /// TOML configuration file, layered over the defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory for results.json, run_data.json and run_data_hashes.json
    #[arg(short, long, default_value = "roi_tracking_output")]
    pub output: PathBuf,

    /// Read session files from this directory (sets `data_kind = "json"`)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Override `general.random_seed`
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override `n_jobs_findParameters` (values above 1 are not reproducible)
    #[arg(long)]
    pub n_jobs: Option<usize>,
}

pub fn handle_track(args: TrackArgs, verbose: u8) -> i32 {
    match run(&args, verbose) {
        Ok(()) => CliExitCode::Success as i32,
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit_code_for_error(&e) as i32
        }
    }
}

fn run(args: &TrackArgs, verbose: u8) -> anyhow::Result<()> {
    let mut overrides = Map::new();
    if let Some(dir) = &args.data_dir {
        set_path(&mut overrides, "data_loading.data_kind", json!("json"));
        set_path(&mut overrides, "data_loading.dir_outer", json!(dir.to_string_lossy()));
    }
    if let Some(seed) = args.seed {
        set_path(&mut overrides, "general.random_seed", json!(seed));
    }
    if let Some(n_jobs) = args.n_jobs {
        set_path(
            &mut overrides,
            "clustering.automatic_mixing.n_jobs_findParameters",
            json!(n_jobs),
        );
    }
    let config = load_config(args.config.as_deref(), overrides)?;
    logging::init(verbose, &config.logging.level, config.logging.include_location);

    let orchestrator = PipelineOrchestrator::new(config)?;
    let output = orchestrator.run().context("running tracking pipeline")?;
    let written = output
        .write_to(&args.output)
        .with_context(|| format!("writing outputs to {}", args.output.display()))?;
    info!(n_files = written.len(), dir = %args.output.display(), "Wrote outputs");

    let results = &output.results;
    println!(
        "Tracked {} ROIs in {} sessions: {} clusters, {} unclustered, {} violations",
        results.rois.n_rois_total,
        results.rois.n_sessions,
        results.clusters.n_clusters(),
        results.clusters.n_unclustered(),
        results.clusters.violations_labels.len()
    );
    println!(
        "Search ended {:?} after {} trials (best quality {:.4})",
        results.search.state,
        results.search.trials.len(),
        results.search.best_quality().unwrap_or(f64::NAN)
    );
    for path in &written {
        println!("  {}", path.display());
    }
    Ok(())
}
