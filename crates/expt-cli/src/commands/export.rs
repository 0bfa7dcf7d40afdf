use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use expt_run::{ExportOptions, Snapshot};

/// Arguments of `expt export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Experiment snapshot.
    pub file: PathBuf,
    /// CSV file to write.
    pub output: PathBuf,
    /// Data columns to leave out, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,
    /// Single-byte field delimiter.
    #[arg(long, default_value_t = ',')]
    pub delim: char,
    /// Leave the index column headers empty.
    #[arg(long)]
    pub no_index_label: bool,
    /// Text for missing cells.
    #[arg(long, default_value = "")]
    pub nan: String,
}

/// Exports bottom-level results; callbacks are not needed.
pub fn run(args: &ExportArgs) -> Result<(), Box<dyn Error>> {
    let delimiter =
        u8::try_from(args.delim).map_err(|_| format!("delimiter {:?} is not a single byte", args.delim))?;
    let experiment = Snapshot::read(&args.file)?.experiment;
    let options = ExportOptions {
        skip_columns: args.skip.clone(),
        delimiter,
        index_label: !args.no_index_label,
        nan: args.nan.clone(),
    };
    let rows = experiment.export_csv(&args.output, &options)?;
    println!("wrote {rows} rows to {}", args.output.display());
    Ok(())
}
