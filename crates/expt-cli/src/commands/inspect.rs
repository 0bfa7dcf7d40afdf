use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use expt_run::{canonical_json, Snapshot};

/// Arguments of `expt inspect`.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Experiment snapshot.
    pub file: PathBuf,
}

/// Prints levels, section counts and progress as JSON.
pub fn run(args: &InspectArgs) -> Result<(), Box<dyn Error>> {
    let snapshot = Snapshot::read(&args.file)?;
    let summary = snapshot.experiment.summary();
    let json = canonical_json(&summary, true)?;
    println!("{}", String::from_utf8(json)?);
    Ok(())
}
