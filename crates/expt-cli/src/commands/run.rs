use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use expt_run::{run_and_save, CallbackRegistry, RunOptions};
use tracing::{info, warn};

use super::{locate, nothing_to_run, parse_numbers};

/// Arguments of `expt run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Experiment snapshot.
    pub file: PathBuf,
    /// Section as `LEVEL N` pairs, e.g. `participant 3 block 1`; the whole
    /// experiment when omitted.
    #[arg(conflicts_with = "next")]
    pub section: Vec<String>,
    /// Run the first section at LEVEL that has not started.
    #[arg(long, value_name = "LEVEL")]
    pub next: Option<String>,
    /// With `--next`, pick the first section that has not finished instead.
    #[arg(long, requires = "next")]
    pub not_finished: bool,
    /// 1-based start positions below the section, e.g. `2,5`.
    #[arg(long = "from", value_delimiter = ',')]
    pub from_section: Vec<usize>,
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

/// Runs the selected section and saves the experiment.
pub fn run(args: &RunArgs, registry: &CallbackRegistry) -> Result<(), Box<dyn Error>> {
    let numbers = parse_numbers(&args.section)?;
    let options = RunOptions {
        demo: args.demo,
        parent_callbacks: !args.skip_parents,
        from_section: args.from_section.clone(),
    };
    let outcome = run_and_save(
        &args.file,
        registry,
        |experiment| match &args.next {
            Some(level) => experiment
                .root()
                .find_first_not_run(level, !args.not_finished)
                .ok_or_else(|| nothing_to_run(level, "unrun")),
            None => locate(experiment, &numbers),
        },
        false,
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
