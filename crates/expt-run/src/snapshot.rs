//! Saving and loading experiments.
//!
//! A snapshot stores the design tree, the realized section tree, persistent
//! data and callback keys. Session state and callback closures are never
//! written; loading re-binds the keys against a host registry.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::SchemaVersion;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::callbacks::CallbackRegistry;
use crate::codec::{canonical_digest, FileFormat};
use crate::experiment::{Experiment, RunOptions};

/// Schema version written into new snapshots.
pub const SNAPSHOT_SCHEMA: SchemaVersion = SchemaVersion::new(1, 0, 0);

#[derive(Serialize)]
struct SnapshotRef<'a> {
    schema_version: SchemaVersion,
    created_at: String,
    design_hash: String,
    experiment: &'a Experiment,
}

/// A loaded snapshot.
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    /// Schema the snapshot was written with.
    pub schema_version: SchemaVersion,
    /// RFC 3339 timestamp of the save.
    pub created_at: String,
    /// Hash of the design tree at save time.
    pub design_hash: String,
    /// The saved experiment, not yet bound to callbacks.
    pub experiment: Experiment,
}

fn snapshot_error(code: &str, path: &Path, err: impl ToString) -> ExptError {
    ExptError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

impl Snapshot {
    /// Reads and validates a snapshot without binding callbacks.
    pub fn read(path: &Path) -> Result<Self, ExptError> {
        let bytes = fs::read(path).map_err(|err| snapshot_error("snapshot-read", path, err))?;
        let snapshot: Snapshot = FileFormat::from_path(path).decode(&bytes)?;
        if !SNAPSHOT_SCHEMA.is_compatible_with(&snapshot.schema_version) {
            return Err(ExptError::Serde(
                ErrorInfo::new("snapshot-schema", "snapshot schema is not supported")
                    .with_context("path", path.display().to_string())
                    .with_context("found", snapshot.schema_version.to_string()),
            ));
        }
        let design_hash = snapshot.experiment.design_hash()?;
        if design_hash != snapshot.design_hash {
            return Err(ExptError::Serde(
                ErrorInfo::new("snapshot-design-hash", "design tree does not match its hash")
                    .with_context("path", path.display().to_string())
                    .with_hint("the snapshot was edited or truncated"),
            ));
        }
        Ok(snapshot)
    }
}

impl Experiment {
    /// Stable hash of the design tree.
    pub fn design_hash(&self) -> Result<String, ExptError> {
        canonical_digest(&self.tree)
    }

    /// Writes a snapshot to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ExptError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| snapshot_error("snapshot-mkdir", parent, err))?;
            }
        }
        let snapshot = SnapshotRef {
            schema_version: SNAPSHOT_SCHEMA,
            created_at: Utc::now().to_rfc3339(),
            design_hash: self.design_hash()?,
            experiment: self,
        };
        let bytes = FileFormat::from_path(path).encode(&snapshot)?;
        fs::write(path, bytes).map_err(|err| snapshot_error("snapshot-write", path, err))?;
        debug!(path = %path.display(), "saved experiment");
        Ok(())
    }

    /// Saves to the experiment's own filename.
    pub fn save_to_filename(&self) -> Result<(), ExptError> {
        let path = self.filename().ok_or_else(|| {
            ExptError::State(
                ErrorInfo::new("snapshot-no-filename", "experiment has no filename")
                    .with_hint("pass an explicit path or set the filename first"),
            )
        })?;
        self.save(path)
    }

    /// Loads a snapshot and binds its callback keys against `registry`.
    pub fn load(path: &Path, registry: &CallbackRegistry) -> Result<Self, ExptError> {
        let mut experiment = Snapshot::read(path)?.experiment;
        experiment.bind(registry)?;
        experiment.set_filename(Some(path.to_path_buf()));
        debug!(path = %path.display(), "loaded experiment");
        Ok(experiment)
    }
}

/// Backup file name for `path` at `stamp`: `<file>.<mm-dd-HH-MM>-backup`.
pub fn backup_path(path: &Path, stamp: DateTime<Local>) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}-backup", stamp.format("%m-%d-%H-%M")));
    PathBuf::from(name)
}

/// Copies the snapshot at `path` to a timestamped backup, if it exists.
pub fn backup_snapshot(path: &Path) -> Result<Option<PathBuf>, ExptError> {
    if !path.exists() {
        return Ok(None);
    }
    let backup = backup_path(path, Local::now());
    fs::copy(path, &backup).map_err(|err| snapshot_error("snapshot-backup", &backup, err))?;
    Ok(Some(backup))
}

/// Loads `path`, runs (or resumes) the section chosen by `select`, and saves.
///
/// When the run fails or is quit, the previous snapshot is backed up before
/// the partial progress is saved, and the run error is returned. Demo runs
/// never write.
pub fn run_and_save<F>(
    path: &Path,
    registry: &CallbackRegistry,
    select: F,
    resume: bool,
    options: &RunOptions,
    session_options: Option<String>,
) -> Result<Experiment, ExptError>
where
    F: FnOnce(&Experiment) -> Result<Vec<usize>, ExptError>,
{
    let mut experiment = Experiment::load(path, registry)?;
    experiment.session_mut().set_options(session_options);
    let target = select(&experiment)?;
    let outcome = if resume {
        experiment.resume_section(&target, options)
    } else {
        experiment.run_section(&target, options)
    };
    if options.demo {
        return outcome.map(|()| experiment);
    }
    match outcome {
        Ok(()) => {
            experiment.save(path)?;
            Ok(experiment)
        }
        Err(err) => {
            let backup = backup_snapshot(path)?;
            warn!(
                error = %err,
                backup = ?backup.as_ref().map(|backup| backup.display().to_string()),
                "run stopped early; saving partial progress"
            );
            experiment.save(path)?;
            Err(err)
        }
    }
}
