//! The experiment: a realized section tree plus callbacks and session state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Data, RngHandle};
use expt_design::{Design, DesignTree, Iv, Level, Ordering, TreeCursor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::callbacks::{
    BoundCallbacks, CallbackBinding, CallbackRegistry, LevelBinding, SessionState,
};
use crate::section::{overlay, Section};

/// Substream used to build design trees from a master seed.
pub const TREE_STREAM: u64 = 0;
/// Substream used to realize the section tree.
pub const REALIZE_STREAM: u64 = 1;
const EDIT_STREAM_BASE: u64 = 2;

/// Options of a single run call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Run without recording progress or results.
    pub demo: bool,
    /// Enter (and leave) the start/end hooks of every ancestor.
    pub parent_callbacks: bool,
    /// 1-based start positions, one per level below the run section.
    pub from_section: Vec<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            demo: false,
            parent_callbacks: true,
            from_section: Vec::new(),
        }
    }
}

/// Progress counts of one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    /// Level name.
    pub level: String,
    /// Sections at the level.
    pub sections: usize,
    /// Sections that have started.
    pub started: usize,
    /// Sections that have finished.
    pub finished: usize,
}

/// Overview of an experiment for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    /// Master seed.
    pub seed: u64,
    /// Snapshot file, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    /// Progress per level, top-down.
    pub levels: Vec<LevelProgress>,
    /// Callback keys.
    pub callbacks: CallbackBinding,
    /// Keys of the persistent data.
    pub persistent_keys: Vec<String>,
}

/// A realized experiment.
///
/// The root section sits at the implicit `_base` level. Callback closures
/// and session state are not serialized; call [`Experiment::bind`] after
/// deserializing.
#[derive(Debug, Serialize, Deserialize)]
pub struct Experiment {
    pub(crate) tree: DesignTree,
    pub(crate) root: Section,
    pub(crate) seed: u64,
    #[serde(default)]
    pub(crate) draws: u64,
    #[serde(default)]
    pub(crate) persistent: Data,
    #[serde(default)]
    pub(crate) callbacks: CallbackBinding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) filename: Option<PathBuf>,
    #[serde(skip)]
    pub(crate) session: SessionState,
    #[serde(skip)]
    pub(crate) bound: Option<BoundCallbacks>,
}

impl Experiment {
    /// Realizes an experiment from an initialized design tree.
    pub fn new(mut tree: DesignTree, seed: u64) -> Result<Self, ExptError> {
        tree.add_base_level()?;
        let mut rng = RngHandle::substream(seed, REALIZE_STREAM);
        let root = Section::realize(&tree, &mut rng)?;
        debug!(seed, sections = root.walk().len(), "realized experiment");
        Ok(Self {
            tree,
            root,
            seed,
            draws: 0,
            persistent: Data::new(),
            callbacks: CallbackBinding::default(),
            filename: None,
            session: SessionState::default(),
            bound: None,
        })
    }

    /// Participants by trials, with every IV at the trial level.
    pub fn within_subjects(
        ivs: Vec<Iv>,
        n_participants: usize,
        design_matrix: Option<Vec<Vec<expt_core::Value>>>,
        ordering: Option<Ordering>,
        seed: u64,
    ) -> Result<Self, ExptError> {
        let levels = vec![
            Level::new(
                "participant",
                Design::empty(Ordering::shuffle(n_participants, false)?)?,
            ),
            Level::new(
                "trial",
                Design::new(ivs, design_matrix, ordering, Data::new())?,
            ),
        ];
        let tree = DesignTree::new(levels, &mut RngHandle::substream(seed, TREE_STREAM))?;
        Self::new(tree, seed)
    }

    /// Participants by blocks by trials.
    ///
    /// With a non-atomic block ordering, `n_participants` counts participants
    /// per block order.
    pub fn blocked(
        trial_ivs: Vec<Iv>,
        block_ivs: Vec<Iv>,
        n_participants: usize,
        block_ordering: Option<Ordering>,
        trial_ordering: Option<Ordering>,
        seed: u64,
    ) -> Result<Self, ExptError> {
        let levels = vec![
            Level::new(
                "participant",
                Design::empty(Ordering::shuffle(n_participants, false)?)?,
            ),
            Level::new(
                "block",
                Design::new(block_ivs, None, block_ordering, Data::new())?,
            ),
            Level::new(
                "trial",
                Design::new(trial_ivs, None, trial_ordering, Data::new())?,
            ),
        ];
        let tree = DesignTree::new(levels, &mut RngHandle::substream(seed, TREE_STREAM))?;
        Self::new(tree, seed)
    }

    /// Arbitrary levels, each with one fully crossed design.
    pub fn basic(
        levels: &[&str],
        mut ivs_by_level: BTreeMap<String, Vec<Iv>>,
        mut orderings_by_level: BTreeMap<String, Ordering>,
        seed: u64,
    ) -> Result<Self, ExptError> {
        let levels = levels
            .iter()
            .map(|&name| {
                let design = Design::new(
                    ivs_by_level.remove(name).unwrap_or_default(),
                    None,
                    orderings_by_level.remove(name),
                    Data::new(),
                )?;
                Ok(Level::new(name, design))
            })
            .collect::<Result<Vec<_>, ExptError>>()?;
        let tree = DesignTree::new(levels, &mut RngHandle::substream(seed, TREE_STREAM))?;
        Self::new(tree, seed)
    }

    /// Root section.
    pub fn root(&self) -> &Section {
        &self.root
    }

    /// Mutable root section.
    pub fn root_mut(&mut self) -> &mut Section {
        &mut self.root
    }

    /// Design tree, including the `_base` level.
    pub fn tree(&self) -> &DesignTree {
        &self.tree
    }

    /// Master seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Data saved with the experiment and shared with every callback.
    pub fn persistent(&self) -> &Data {
        &self.persistent
    }

    /// Mutable persistent data.
    pub fn persistent_mut(&mut self) -> &mut Data {
        &mut self.persistent
    }

    /// Session state, discarded when the experiment is saved.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Mutable session state.
    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    /// Callback keys.
    pub fn callbacks(&self) -> &CallbackBinding {
        &self.callbacks
    }

    /// Snapshot file associated with the experiment.
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Sets the snapshot file.
    pub fn set_filename(&mut self, filename: Option<PathBuf>) {
        self.filename = filename;
    }

    /// Sets the bottom-level run callback key; requires a new [`Experiment::bind`].
    pub fn set_run_callback(&mut self, key: impl Into<String>) {
        self.callbacks.run = Some(key.into());
        self.bound = None;
    }

    /// Sets the hook keys of a level; requires a new [`Experiment::bind`].
    pub fn set_level_callbacks(&mut self, level: impl Into<String>, binding: LevelBinding) {
        self.callbacks.levels.insert(level.into(), binding);
        self.bound = None;
    }

    /// Replaces every callback key; requires a new [`Experiment::bind`].
    pub fn set_callbacks(&mut self, callbacks: CallbackBinding) {
        self.callbacks = callbacks;
        self.bound = None;
    }

    /// Resolves the callback keys against a host registry.
    pub fn bind(&mut self, registry: &CallbackRegistry) -> Result<(), ExptError> {
        self.bound = Some(self.callbacks.bind(registry)?);
        Ok(())
    }

    /// Whether every referenced callback is resolved.
    pub fn is_bound(&self) -> bool {
        self.bound.is_some() || self.callbacks.is_empty()
    }

    fn next_rng(&mut self) -> RngHandle {
        let rng = RngHandle::substream(self.seed, EDIT_STREAM_BASE + self.draws);
        self.draws += 1;
        rng
    }

    /// Realizes a new child of the section at `path` from the experiment's tree.
    pub fn append_child(&mut self, path: &[usize], data: Data, to_start: bool) -> Result<(), ExptError> {
        let mut rng = self.next_rng();
        let cursor = child_cursor(&self.tree, &self.root, path)?;
        let context = self.root.resolved_data(path)?;
        self.root
            .section_mut(path)?
            .append_child(data, cursor, to_start, &context, &mut rng)?;
        clear_finished_ancestors(&mut self.root, path);
        Ok(())
    }

    /// Realizes every top-level section of `tree` below the section at `path`.
    pub fn append_tree(
        &mut self,
        path: &[usize],
        tree: &DesignTree,
        to_start: bool,
    ) -> Result<(), ExptError> {
        let mut rng = self.next_rng();
        let context = self.root.resolved_data(path)?;
        self.root
            .section_mut(path)?
            .append_tree(tree, to_start, &context, &mut rng)?;
        clear_finished_ancestors(&mut self.root, path);
        Ok(())
    }

    /// Progress overview.
    pub fn summary(&self) -> ExperimentSummary {
        let sections = self.root.walk();
        let levels = self
            .root
            .levels()
            .into_iter()
            .map(|level| {
                let at_level: Vec<&&Section> = sections
                    .iter()
                    .filter(|section| section.level() == level)
                    .collect();
                LevelProgress {
                    sections: at_level.len(),
                    started: at_level.iter().filter(|section| section.has_started()).count(),
                    finished: at_level.iter().filter(|section| section.has_finished()).count(),
                    level,
                }
            })
            .collect();
        ExperimentSummary {
            seed: self.seed,
            filename: self.filename.clone(),
            levels,
            callbacks: self.callbacks.clone(),
            persistent_keys: self.persistent.keys().cloned().collect(),
        }
    }
}

/// Cursor on the declared child level of the section at `path`.
fn child_cursor<'t>(
    tree: &'t DesignTree,
    root: &Section,
    path: &[usize],
) -> Result<TreeCursor<'t>, ExptError> {
    let mut cursor = tree.cursor();
    let mut section = root;
    let mut context = root.data().clone();
    for &idx in path {
        section = section.children().get(idx).ok_or_else(|| {
            ExptError::State(ErrorInfo::new("section-not-found", "no section at the given path"))
        })?;
        cursor = cursor.next(&context)?.ok_or_else(|| no_child_level(section))?;
        overlay(&mut context, section.data());
    }
    cursor.next(&context)?.ok_or_else(|| no_child_level(section))
}

fn no_child_level(section: &Section) -> ExptError {
    ExptError::State(
        ErrorInfo::new("no-child-level", "the design tree declares no level below this section")
            .with_context("section", section.description()),
    )
}

fn clear_finished_ancestors(root: &mut Section, path: &[usize]) {
    for depth in 0..path.len() {
        if let Some(ancestor) = root.get_mut(&path[..depth]) {
            ancestor.clear_finished();
        }
    }
}
