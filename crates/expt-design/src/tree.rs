//! Multi-level design trees and the bottom-up first pass.

use std::collections::BTreeMap;

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Data, RngHandle, Value, BASE_LEVEL, DESIGN_IV};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::design::{Design, Iv};
use crate::order::Ordering;

/// A named level holding one or more designs run back-to-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Level name, e.g. `participant` or `trial`.
    pub name: String,
    /// Designs run in sequence at this level.
    pub designs: Vec<Design>,
}

impl Level {
    /// Creates a level with a single design.
    pub fn new(name: impl Into<String>, design: Design) -> Self {
        Self {
            name: name.into(),
            designs: vec![design],
        }
    }

    /// Creates a level with several designs run in sequence.
    pub fn sequence(name: impl Into<String>, designs: Vec<Design>) -> Self {
        Self {
            name: name.into(),
            designs,
        }
    }
}

/// Hierarchy of levels with optional heterogeneous branches below the
/// bottom level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignTree {
    levels: Vec<Level>,
    #[serde(default)]
    branches: BTreeMap<String, DesignTree>,
}

impl DesignTree {
    /// Builds a homogeneous tree and runs the first pass.
    pub fn new(levels: Vec<Level>, rng: &mut RngHandle) -> Result<Self, ExptError> {
        Self::build(levels, BTreeMap::new(), rng)
    }

    /// Builds a tree whose bottom level may branch into `other_trees`.
    ///
    /// When the bottom level declares the `design` IV, each of its values
    /// must name an entry of `other_trees`; those sub-trees are built and
    /// initialized independently. The first pass then runs bottom-up over
    /// this tree's own levels.
    pub fn build(
        mut levels: Vec<Level>,
        other_trees: BTreeMap<String, Vec<Level>>,
        rng: &mut RngHandle,
    ) -> Result<Self, ExptError> {
        validate_levels(&levels)?;
        let mut branches = BTreeMap::new();
        let bottom = levels.last().and_then(|level| level.designs.first());
        if let Some(design) = bottom.filter(|design| design.is_heterogeneous()) {
            for value in design.branches() {
                let name = branch_name(&value)?;
                if branches.contains_key(&name) {
                    continue;
                }
                let sub_levels = other_trees.get(&name).cloned().ok_or_else(|| {
                    ExptError::Spec(
                        ErrorInfo::new("branch-missing", "no tree defined for a design branch")
                            .with_context("branch", name.clone()),
                    )
                })?;
                let mut remaining = other_trees.clone();
                remaining.remove(&name);
                debug!(branch = %name, "building design branch");
                branches.insert(name, DesignTree::build(sub_levels, remaining, rng)?);
            }
        }
        first_pass(&mut levels, rng)?;
        Ok(Self { levels, branches })
    }

    /// Levels of this tree, top first.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Heterogeneous sub-trees keyed by branch name.
    pub fn branches(&self) -> &BTreeMap<String, DesignTree> {
        &self.branches
    }

    /// Level names of this tree, top first.
    pub fn level_names(&self) -> Vec<&str> {
        self.levels.iter().map(|level| level.name.as_str()).collect()
    }

    /// Prepends the implicit root level used by experiments.
    pub fn add_base_level(&mut self) -> Result<(), ExptError> {
        if self.levels.first().map(|level| level.name.as_str()) == Some(BASE_LEVEL) {
            return Ok(());
        }
        let mut base = Design::empty(Ordering::identity(1)?)?;
        // identity ordering draws nothing from the rng
        base.first_pass(&mut RngHandle::from_seed(0))?;
        self.levels.insert(0, Level::new(BASE_LEVEL, base));
        Ok(())
    }

    /// Cursor on the top level.
    pub fn cursor(&self) -> TreeCursor<'_> {
        TreeCursor {
            tree: self,
            depth: 0,
        }
    }
}

/// Position of one level within a [`DesignTree`], including branches.
#[derive(Debug, Clone, Copy)]
pub struct TreeCursor<'a> {
    tree: &'a DesignTree,
    depth: usize,
}

impl<'a> TreeCursor<'a> {
    /// Level under the cursor.
    pub fn level(&self) -> &'a Level {
        &self.tree.levels[self.depth]
    }

    /// Sub-tree starting at the cursor, sharing branches with the full tree.
    pub fn tree(&self) -> &'a DesignTree {
        self.tree
    }

    /// Depth of the cursor within its (sub-)tree.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether sections at this level have no children.
    pub fn is_bottom(&self) -> bool {
        self.depth + 1 == self.tree.levels.len() && self.tree.branches.is_empty()
    }

    /// Moves one level down.
    ///
    /// `data` is the resolved data of a section at the cursor's level; it
    /// selects the branch when the bottom level is heterogeneous.
    pub fn next(&self, data: &Data) -> Result<Option<TreeCursor<'a>>, ExptError> {
        if self.depth + 1 < self.tree.levels.len() {
            return Ok(Some(TreeCursor {
                tree: self.tree,
                depth: self.depth + 1,
            }));
        }
        if self.tree.branches.is_empty() {
            return Ok(None);
        }
        let selected = data.get(DESIGN_IV).ok_or_else(|| {
            ExptError::State(
                ErrorInfo::new("branch-unbound", "section data does not select a design branch")
                    .with_context("level", self.level().name.clone()),
            )
        })?;
        let name = branch_name(selected)?;
        let branch = self.tree.branches.get(&name).ok_or_else(|| {
            ExptError::State(
                ErrorInfo::new("branch-unknown", "section data selects an unknown branch")
                    .with_context("branch", name.clone()),
            )
        })?;
        Ok(Some(branch.cursor()))
    }
}

fn branch_name(value: &Value) -> Result<String, ExptError> {
    match value {
        Value::Text(name) => Ok(name.clone()),
        other => Err(ExptError::Spec(
            ErrorInfo::new("branch-name", "design branch values must be text")
                .with_context("value", other.to_string()),
        )),
    }
}

fn validate_levels(levels: &[Level]) -> Result<(), ExptError> {
    if levels.is_empty() {
        return Err(ExptError::Spec(ErrorInfo::new(
            "tree-empty",
            "a design tree needs at least one level",
        )));
    }
    for (idx, level) in levels.iter().enumerate() {
        if level.designs.is_empty() {
            return Err(ExptError::Spec(
                ErrorInfo::new("level-without-designs", "every level needs a design")
                    .with_context("level", level.name.clone()),
            ));
        }
        if levels[..idx].iter().any(|other| other.name == level.name) {
            return Err(ExptError::Spec(
                ErrorInfo::new("level-duplicate", "level names must be unique within a tree")
                    .with_context("level", level.name.clone()),
            ));
        }
    }
    Ok(())
}

/// Runs the first pass bottom-up, folding synthetic IVs into the level above.
fn first_pass(levels: &mut [Level], rng: &mut RngHandle) -> Result<(), ExptError> {
    for idx in (1..levels.len()).rev() {
        let mut synthetic = Vec::new();
        for design in &mut levels[idx].designs {
            if let Some(iv) = design.first_pass(rng)? {
                synthetic.push(Iv::from(iv));
            }
        }
        if synthetic.is_empty() {
            continue;
        }
        let parent = &mut levels[idx - 1];
        debug!(
            level = %parent.name,
            ivs = synthetic.len(),
            "adding synthetic IVs to parent level"
        );
        for design in &mut parent.designs {
            design.update(synthetic.clone())?;
        }
    }
    if let Some(top) = levels.first_mut() {
        for design in &mut top.designs {
            if let Some(iv) = design.first_pass(rng)? {
                return Err(ExptError::Spec(
                    ErrorInfo::new(
                        "non-atomic-root",
                        "the top level cannot use a non-atomic ordering",
                    )
                    .with_context("level", top.name.clone())
                    .with_context("iv", iv.name)
                    .with_hint("add a level above it to host the ordering"),
                ));
            }
        }
    }
    Ok(())
}
