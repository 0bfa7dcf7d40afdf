#![deny(missing_docs)]
#![doc = "The `expt` command line: create experiments from YAML, run and resume sections, export results."]

use std::error::Error;

use clap::{Parser, Subcommand};
use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::Data;
use expt_run::CallbackRegistry;
use tracing_subscriber::EnvFilter;

/// Subcommand implementations.
pub mod commands;

use commands::{
    create::{self, CreateArgs},
    export::{self, ExportArgs},
    inspect::{self, InspectArgs},
    resume::{self, ResumeArgs},
    run::{self, RunArgs},
};

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "expt", version, about = "Hierarchical experiment runner")]
pub struct Cli {
    /// Log at debug level, ignoring RUST_LOG.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and realize an experiment from a YAML definition and save it.
    Create(CreateArgs),
    /// Run a section of a saved experiment and save the results.
    Run(RunArgs),
    /// Continue a started section from its first unfinished descendant.
    Resume(ResumeArgs),
    /// Write one CSV row per bottom-level section.
    Export(ExportArgs),
    /// Print a JSON summary of a saved experiment.
    Inspect(InspectArgs),
}

/// Installs the stderr log subscriber; later calls are no-ops.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Executes a parsed command line with the host's callbacks.
pub fn run_with_registry(cli: Cli, registry: &CallbackRegistry) -> Result<(), Box<dyn Error>> {
    init_tracing(cli.debug);
    match cli.command {
        Command::Create(args) => create::run(&args),
        Command::Run(args) => run::run(&args, registry),
        Command::Resume(args) => resume::run(&args, registry),
        Command::Export(args) => export::run(&args),
        Command::Inspect(args) => inspect::run(&args),
    }
}

fn echo(context: &Data) -> Result<(), ExptError> {
    let line = serde_json::to_string(context)
        .map_err(|err| ExptError::Serde(ErrorInfo::new("echo-serialize", err.to_string())))?;
    println!("{line}");
    Ok(())
}

/// Callbacks available without host code.
///
/// `noop` does nothing; `echo` prints the section's resolved data as one JSON
/// line. Both are registered as run and level callbacks.
pub fn builtin_registry() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry
        .register_run("noop", |_, _, _| Ok(Data::new()))
        .register_run("echo", |_, _, context| echo(context).map(|()| Data::new()))
        .register_level("noop", |_, _, _| Ok(()))
        .register_level("echo", |_, _, context| echo(context));
    registry
}
