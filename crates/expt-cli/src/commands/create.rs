use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use expt_run::{Experiment, ExperimentConfig};

/// Arguments of `expt create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// YAML experiment definition.
    pub config: PathBuf,
    /// Snapshot to write; defaults to the definition's `filename`.
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Master seed overriding the definition's.
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Builds, realizes and saves the experiment.
pub fn run(args: &CreateArgs) -> Result<(), Box<dyn Error>> {
    let mut config = ExperimentConfig::from_path(&args.config)?;
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    let out = args
        .out
        .clone()
        .or_else(|| config.filename.clone())
        .ok_or("no snapshot file: pass --out or set `filename` in the definition")?;

    let mut experiment = Experiment::from_config(config)?;
    experiment.set_filename(Some(out.clone()));
    experiment.save(&out)?;

    println!("created {} (seed {})", out.display(), experiment.seed());
    for level in experiment.summary().levels {
        println!("  {}: {} sections", level.level, level.sections);
    }
    Ok(())
}
