//! Realized experiment sections.
//!
//! Sections own their children by value. Each section stores only its own
//! data layer; the context seen by a section is the merge of every layer from
//! the root down to it, so lookups that need ancestors take a path from the
//! root. Paths are 0-based child indices; user-facing positions (`child`,
//! `at`, `from_section`) are 1-based.

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Data, RngHandle, Value};
use expt_design::{DesignTree, TreeCursor};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// One node of the realized experiment tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    level: String,
    #[serde(default)]
    data: Data,
    #[serde(default)]
    children: Vec<Section>,
    #[serde(default)]
    has_started: bool,
    #[serde(default)]
    has_finished: bool,
    #[serde(default)]
    child_level: Option<String>,
}

/// Merges `layer` over `context`.
pub fn overlay(context: &mut Data, layer: &Data) {
    for (key, value) in layer {
        context.insert(key.clone(), value.clone());
    }
}

impl Section {
    /// Realizes a whole tree below a root section at the tree's top level.
    pub fn realize(tree: &DesignTree, rng: &mut RngHandle) -> Result<Self, ExptError> {
        Self::from_cursor(tree.cursor(), Data::new(), &Data::new(), rng)
    }

    /// Realizes a section at the cursor's level with all its descendants.
    ///
    /// `parent_context` is the resolved data of the future parent.
    pub fn from_cursor(
        cursor: TreeCursor<'_>,
        data: Data,
        parent_context: &Data,
        rng: &mut RngHandle,
    ) -> Result<Self, ExptError> {
        let mut context = parent_context.clone();
        overlay(&mut context, &data);
        let mut section = Section {
            level: cursor.level().name.clone(),
            data,
            children: Vec::new(),
            has_started: false,
            has_finished: false,
            child_level: None,
        };
        if let Some(next) = cursor.next(&context)? {
            section.child_level = Some(next.level().name.clone());
            for design in &next.level().designs {
                for condition in design.get_order(&context, rng)? {
                    let child = Section::from_cursor(next, condition, &context, rng)?;
                    section.children.push(child);
                }
            }
            section.renumber();
        }
        Ok(section)
    }

    /// Level name of this section.
    pub fn level(&self) -> &str {
        &self.level
    }

    /// This section's own data layer.
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Children in run order.
    pub fn children(&self) -> &[Section] {
        &self.children
    }

    /// Whether the section has been entered by a run.
    pub fn has_started(&self) -> bool {
        self.has_started
    }

    /// Whether the section ran to completion.
    pub fn has_finished(&self) -> bool {
        self.has_finished
    }

    /// Declared level of this section's children.
    pub fn child_level(&self) -> Option<&str> {
        self.child_level.as_deref()
    }

    /// Whether the section sits at the lowest level.
    pub fn is_bottom_level(&self) -> bool {
        self.child_level.is_none()
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the section has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// 1-based number among same-level siblings.
    pub fn number(&self) -> Option<i64> {
        self.data.get(&self.level).and_then(Value::as_i64)
    }

    /// Level name followed by the section number, e.g. `trial 3`.
    pub fn description(&self) -> String {
        match self.number() {
            Some(number) => format!("{} {}", self.level, number),
            None => self.level.clone(),
        }
    }

    /// Levels of the children of this section, in order of appearance.
    pub fn local_levels(&self) -> Vec<String> {
        let levels: IndexSet<&str> = self.children.iter().map(|child| child.level()).collect();
        levels.into_iter().map(str::to_string).collect()
    }

    /// Levels of every descendant, top-down.
    pub fn levels(&self) -> Vec<String> {
        let mut levels: IndexSet<String> = IndexSet::new();
        for section in self.walk() {
            levels.extend(section.local_levels());
        }
        levels.into_iter().collect()
    }

    /// This section and every descendant in depth-first pre-order.
    pub fn walk(&self) -> Vec<&Section> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(section) = stack.pop() {
            out.push(section);
            stack.extend(section.children.iter().rev());
        }
        out
    }

    fn position_to_index(&self, position: isize) -> Result<usize, ExptError> {
        let len = self.children.len() as isize;
        let index = match position {
            0 => {
                return Err(ExptError::State(
                    ErrorInfo::new("zero-index", "section positions are 1-based")
                        .with_context("section", self.description())
                        .with_hint("use 1 for the first child and -1 for the last"),
                ))
            }
            p if p > 0 => p - 1,
            p => len + p,
        };
        if index < 0 || index >= len {
            return Err(ExptError::State(
                ErrorInfo::new("index-out-of-range", "no child at this position")
                    .with_context("section", self.description())
                    .with_context("position", position.to_string())
                    .with_context("children", len.to_string()),
            ));
        }
        Ok(index as usize)
    }

    /// Child at a 1-based position; negative positions count from the end.
    pub fn child(&self, position: isize) -> Result<&Section, ExptError> {
        let index = self.position_to_index(position)?;
        Ok(&self.children[index])
    }

    /// Mutable child at a 1-based position.
    pub fn child_mut(&mut self, position: isize) -> Result<&mut Section, ExptError> {
        let index = self.position_to_index(position)?;
        Ok(&mut self.children[index])
    }

    /// Descends through 1-based positions, one per level.
    pub fn at(&self, positions: &[isize]) -> Result<&Section, ExptError> {
        positions
            .iter()
            .try_fold(self, |section, &position| section.child(position))
    }

    /// Converts 1-based positions into a 0-based index path.
    pub fn path_of(&self, positions: &[isize]) -> Result<Vec<usize>, ExptError> {
        let mut section = self;
        let mut path = Vec::with_capacity(positions.len());
        for &position in positions {
            let index = section.position_to_index(position)?;
            path.push(index);
            section = &section.children[index];
        }
        Ok(path)
    }

    /// Section at a 0-based index path, if any.
    pub fn get(&self, path: &[usize]) -> Option<&Section> {
        path.iter()
            .try_fold(self, |section, &idx| section.children.get(idx))
    }

    /// Mutable section at a 0-based index path, if any.
    pub fn get_mut(&mut self, path: &[usize]) -> Option<&mut Section> {
        path.iter()
            .try_fold(self, |section, &idx| section.children.get_mut(idx))
    }

    /// Section at a 0-based index path.
    pub fn section(&self, path: &[usize]) -> Result<&Section, ExptError> {
        self.get(path).ok_or_else(|| missing_path(path))
    }

    /// Mutable section at a 0-based index path.
    pub fn section_mut(&mut self, path: &[usize]) -> Result<&mut Section, ExptError> {
        self.get_mut(path).ok_or_else(|| missing_path(path))
    }

    /// Sections from this one down to the parent of the section at `path`.
    pub fn parents(&self, path: &[usize]) -> Result<Vec<&Section>, ExptError> {
        let mut chain = Vec::with_capacity(path.len());
        let mut section = self;
        for &idx in path {
            chain.push(section);
            section = section.children.get(idx).ok_or_else(|| missing_path(path))?;
        }
        Ok(chain)
    }

    /// Merged data seen by the section at `path`.
    pub fn resolved_data(&self, path: &[usize]) -> Result<Data, ExptError> {
        let mut context = self.data.clone();
        let mut section = self;
        for &idx in path {
            section = section.children.get(idx).ok_or_else(|| missing_path(path))?;
            overlay(&mut context, &section.data);
        }
        Ok(context)
    }

    /// Adds entries to this section's own layer.
    pub fn add_data(&mut self, data: Data) {
        self.data.extend(data);
    }

    /// Realizes a new child at `cursor`'s level from explicit data.
    ///
    /// `context` is the resolved data of this section.
    pub fn append_child(
        &mut self,
        data: Data,
        cursor: TreeCursor<'_>,
        to_start: bool,
        context: &Data,
        rng: &mut RngHandle,
    ) -> Result<(), ExptError> {
        let child = Section::from_cursor(cursor, data, context, rng)?;
        if to_start {
            self.children.insert(0, child);
        } else {
            self.children.push(child);
        }
        self.after_insert();
        Ok(())
    }

    /// Realizes every section of `tree`'s top level as new children.
    ///
    /// `context` is the resolved data of this section.
    pub fn append_tree(
        &mut self,
        tree: &DesignTree,
        to_start: bool,
        context: &Data,
        rng: &mut RngHandle,
    ) -> Result<(), ExptError> {
        let cursor = tree.cursor();
        if cursor.level().name == self.level {
            return Err(ExptError::Spec(
                ErrorInfo::new(
                    "append-same-level",
                    "cannot append a design tree at the level of the section itself",
                )
                .with_context("level", self.level.clone()),
            ));
        }
        let mut created = Vec::new();
        for design in &cursor.level().designs {
            for condition in design.get_order(context, rng)? {
                created.push(Section::from_cursor(cursor, condition, context, rng)?);
            }
        }
        if to_start {
            created.extend(self.children.drain(..));
            self.children = created;
        } else {
            self.children.extend(created);
        }
        self.after_insert();
        Ok(())
    }

    /// Removes and returns the child at a 1-based position.
    pub fn remove_child(&mut self, position: isize) -> Result<Section, ExptError> {
        let index = self.position_to_index(position)?;
        let removed = self.children.remove(index);
        self.renumber();
        Ok(removed)
    }

    /// Swaps two children given by 1-based positions.
    pub fn swap_children(&mut self, first: isize, second: isize) -> Result<(), ExptError> {
        let first = self.position_to_index(first)?;
        let second = self.position_to_index(second)?;
        self.children.swap(first, second);
        self.renumber();
        Ok(())
    }

    fn after_insert(&mut self) {
        if self.children.iter().any(|child| !child.has_finished) {
            self.has_finished = false;
        }
        self.renumber();
    }

    /// Rewrites 1-based sibling numbers per child level.
    fn renumber(&mut self) {
        for level in self.local_levels() {
            let mut number: i64 = 0;
            for child in self.children.iter_mut().filter(|child| child.level == level) {
                number += 1;
                child.data.insert(level.clone(), Value::Int(number));
            }
        }
    }

    pub(crate) fn mark_started(&mut self) {
        self.has_started = true;
    }

    pub(crate) fn mark_finished(&mut self) {
        self.has_finished = true;
    }

    pub(crate) fn clear_finished(&mut self) {
        self.has_finished = false;
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Section] {
        &mut self.children
    }
}

fn missing_path(path: &[usize]) -> ExptError {
    ExptError::State(
        ErrorInfo::new("section-not-found", "no section at the given path").with_context(
            "path",
            path.iter()
                .map(|idx| (idx + 1).to_string())
                .collect::<Vec<_>>()
                .join("/"),
        ),
    )
}
