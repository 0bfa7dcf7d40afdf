//! Experiment configuration files.
//!
//! ```yaml
//! filename: data/session.json
//! seed: 7
//! callbacks:
//!   run: trial
//!   levels:
//!     block: {start: open_block, end: close_block}
//! design:
//!   - name: participant
//!     ordering: {name: shuffle, number: 4}
//!   - name: trial
//!     ivs: {a: [1, 2], b: [x, y]}
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{entropy_seed, Data, RngHandle};
use expt_design::{DesignTree, TreeSpec};
use serde::{Deserialize, Serialize};

use crate::callbacks::CallbackBinding;
use crate::codec::FileFormat;
use crate::experiment::{Experiment, TREE_STREAM};

/// A declarative experiment description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Snapshot file written by `create`.
    #[serde(default, alias = "file", skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    /// Levels of the design tree, or named trees with a `main` trunk.
    pub design: TreeSpec,
    /// Callback keys resolved against the host registry.
    #[serde(default)]
    pub callbacks: CallbackBinding,
    /// Master seed; drawn from entropy when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Remaining keys, stored as persistent data.
    #[serde(flatten)]
    pub extra: Data,
}

impl ExperimentConfig {
    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ExptError> {
        FileFormat::Yaml.decode(raw.as_bytes())
    }

    /// Reads a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ExptError> {
        let bytes = fs::read(path).map_err(|err| {
            ExptError::Serde(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        FileFormat::Yaml.decode(&bytes)
    }
}

impl Experiment {
    /// Builds and realizes the experiment described by `config`.
    ///
    /// Callbacks are recorded but not bound.
    pub fn from_config(config: ExperimentConfig) -> Result<Self, ExptError> {
        let seed = config.seed.unwrap_or_else(entropy_seed);
        let tree = DesignTree::from_spec(&config.design, &mut RngHandle::substream(seed, TREE_STREAM))?;
        let mut experiment = Experiment::new(tree, seed)?;
        experiment.set_callbacks(config.callbacks);
        experiment.set_filename(config.filename);
        experiment.persistent_mut().extend(config.extra);
        Ok(experiment)
    }
}
