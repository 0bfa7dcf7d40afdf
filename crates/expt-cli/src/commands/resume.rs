use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use expt_run::{run_and_save, CallbackRegistry, RunOptions};
use tracing::{info, warn};

use super::{locate, nothing_to_run, parse_numbers};

/// Arguments of `expt resume`.
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Experiment snapshot.
    pub file: PathBuf,
    /// A single LEVEL (its first partially run section) or `LEVEL N` pairs.
    #[arg(required = true)]
    pub section: Vec<String>,
    /// Run without saving progress or results.
    #[arg(long)]
    pub demo: bool,
    /// Skip the start and end callbacks of the section's ancestors.
    #[arg(long)]
    pub skip_parents: bool,
    /// Free-form options handed to callbacks through the session state.
    #[arg(short = 'o', long)]
    pub options: Option<String>,
}

/// Resumes the selected section and saves the experiment.
pub fn run(args: &ResumeArgs, registry: &CallbackRegistry) -> Result<(), Box<dyn Error>> {
    let level = match args.section.as_slice() {
        [level] => Some(level.clone()),
        _ => None,
    };
    let numbers = match level {
        Some(_) => Vec::new(),
        None => parse_numbers(&args.section)?,
    };
    let options = RunOptions {
        demo: args.demo,
        parent_callbacks: !args.skip_parents,
        from_section: Vec::new(),
    };
    let outcome = run_and_save(
        &args.file,
        registry,
        |experiment| match &level {
            Some(level) => experiment
                .root()
                .find_first_partially_run(level)
                .ok_or_else(|| nothing_to_run(level, "partially run")),
            None => locate(experiment, &numbers),
        },
        true,
        &options,
        args.options.clone(),
    );
    match outcome {
        Ok(_) if args.demo => {
            info!(path = %args.file.display(), "demo run finished; nothing saved");
            Ok(())
        }
        Ok(_) => {
            info!(path = %args.file.display(), "saved experiment");
            Ok(())
        }
        Err(err) if err.is_quit() => {
            warn!(path = %args.file.display(), reason = %err, "session quit; progress saved");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
