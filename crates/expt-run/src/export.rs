//! Flat export of bottom-level results.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use csv::WriterBuilder;
use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Data, Value};
use tracing::debug;

use crate::experiment::Experiment;
use crate::section::{overlay, Section};

/// Options of [`Experiment::export_csv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Data columns left out of the export.
    pub skip_columns: Vec<String>,
    /// Field delimiter.
    pub delimiter: u8,
    /// Write level names as headers of the index columns.
    pub index_label: bool,
    /// Text written for missing or null cells.
    pub nan: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            skip_columns: Vec::new(),
            delimiter: b',',
            index_label: true,
            nan: String::new(),
        }
    }
}

impl Section {
    /// Resolved data of every bottom-level section, in run order.
    pub fn all_leaf_contexts(&self) -> Vec<Data> {
        let mut rows = Vec::new();
        collect_leaves(self, self.data().clone(), &mut rows);
        rows
    }
}

fn collect_leaves(section: &Section, context: Data, rows: &mut Vec<Data>) {
    if section.is_bottom_level() {
        rows.push(context);
        return;
    }
    for child in section.children() {
        let mut child_context = context.clone();
        overlay(&mut child_context, child.data());
        collect_leaves(child, child_context, rows);
    }
}

fn csv_error(code: &str, path: &Path, err: impl ToString) -> ExptError {
    ExptError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

fn cell(value: Option<&Value>, nan: &str) -> String {
    match value {
        None | Some(Value::Null) => nan.to_string(),
        Some(value) => value.to_string(),
    }
}

impl Experiment {
    /// Writes one row per bottom-level section; returns the number of rows.
    ///
    /// Level numbers come first as index columns, followed by every other
    /// key in sorted order.
    pub fn export_csv(&self, path: &Path, options: &ExportOptions) -> Result<usize, ExptError> {
        let index = self.root.levels();
        let rows = self.root.all_leaf_contexts();
        let columns: BTreeSet<&String> = rows
            .iter()
            .flat_map(Data::keys)
            .filter(|key| !index.contains(*key) && !options.skip_columns.contains(*key))
            .collect();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| csv_error("export-create-dir", path, err))?;
            }
        }
        let mut writer = WriterBuilder::new()
            .delimiter(options.delimiter)
            .from_path(path)
            .map_err(|err| csv_error("export-open", path, err))?;

        let header: Vec<String> = index
            .iter()
            .map(|level| if options.index_label { level.clone() } else { String::new() })
            .chain(columns.iter().map(|key| key.to_string()))
            .collect();
        writer
            .write_record(&header)
            .map_err(|err| csv_error("export-write", path, err))?;
        for row in &rows {
            let record: Vec<String> = index
                .iter()
                .chain(columns.iter().copied())
                .map(|key| cell(row.get(key), &options.nan))
                .collect();
            writer
                .write_record(&record)
                .map_err(|err| csv_error("export-write", path, err))?;
        }
        writer
            .flush()
            .map_err(|err| csv_error("export-write", path, err))?;
        debug!(path = %path.display(), rows = rows.len(), columns = header.len(), "exported results");
        Ok(rows.len())
    }
}
