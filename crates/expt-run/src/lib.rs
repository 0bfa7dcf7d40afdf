#![deny(missing_docs)]
#![doc = "Realized section trees, callback-driven execution, snapshots and flat export for expt experiments."]

pub mod callbacks;
pub mod codec;
pub mod config;
pub mod engine;
pub mod experiment;
pub mod export;
pub mod search;
pub mod section;
pub mod snapshot;

pub use callbacks::{
    BoundCallbacks, CallbackBinding, CallbackRegistry, LevelBinding, LevelCallback, LevelHook,
    RunCallback, SessionState,
};
pub use codec::{canonical_digest, canonical_json, FileFormat};
pub use config::ExperimentConfig;
pub use engine::resume_address;
pub use experiment::{
    Experiment, ExperimentSummary, LevelProgress, RunOptions, REALIZE_STREAM, TREE_STREAM,
};
pub use export::ExportOptions;
pub use search::{Positions, Predicate};
pub use section::{overlay, Section};
pub use snapshot::{backup_path, backup_snapshot, run_and_save, Snapshot, SNAPSHOT_SCHEMA};
