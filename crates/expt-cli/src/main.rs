use std::error::Error;

use clap::Parser;
use expt_cli::{builtin_registry, run_with_registry, Cli};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    run_with_registry(cli, &builtin_registry())
}
