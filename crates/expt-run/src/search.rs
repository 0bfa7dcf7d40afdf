//! Read-only searches over a section tree.
//!
//! Searches treat the receiver as the root: predicates see each section
//! together with its data merged from the receiver downwards, and results are
//! 0-based index paths from the receiver.

use std::collections::VecDeque;

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Data, Value};

use crate::section::{overlay, Section};

/// Predicate over a section and its resolved data.
pub type Predicate<'a> = &'a dyn Fn(&Section, &Data) -> bool;

/// Which children to select at one level in [`Section::all_subsections`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Positions {
    /// A single 1-based position.
    One(isize),
    /// Several 1-based positions, in the given order.
    Many(Vec<isize>),
}

impl From<isize> for Positions {
    fn from(position: isize) -> Self {
        Positions::One(position)
    }
}

impl From<Vec<isize>> for Positions {
    fn from(positions: Vec<isize>) -> Self {
        Positions::Many(positions)
    }
}

impl Positions {
    fn as_slice(&self) -> &[isize] {
        match self {
            Positions::One(position) => std::slice::from_ref(position),
            Positions::Many(positions) => positions,
        }
    }
}

impl Section {
    /// Breadth-first search for the first section matching `key`.
    pub fn breadth_first_search(&self, key: Predicate<'_>) -> Option<Vec<usize>> {
        let mut queue: VecDeque<(Vec<usize>, &Section, Data)> = VecDeque::new();
        queue.push_back((Vec::new(), self, self.data().clone()));
        while let Some((path, section, context)) = queue.pop_front() {
            if key(section, &context) {
                return Some(path);
            }
            for (idx, child) in section.children().iter().enumerate() {
                let mut child_path = path.clone();
                child_path.push(idx);
                let mut child_context = context.clone();
                overlay(&mut child_context, child.data());
                queue.push_back((child_path, child, child_context));
            }
        }
        None
    }

    /// Depth-first search for the first section matching `key`.
    ///
    /// With `path_key`, the search only descends into children for which it
    /// holds; the receiver itself must satisfy it to match.
    pub fn depth_first_search(
        &self,
        key: Predicate<'_>,
        path_key: Option<Predicate<'_>>,
    ) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        if dfs(self, self.data(), key, path_key, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    /// Index path of the single section whose resolved data carries every
    /// `(level, number)` pair.
    pub fn locate(&self, numbers: &[(&str, i64)]) -> Result<Vec<usize>, ExptError> {
        let key = |_: &Section, context: &Data| {
            numbers
                .iter()
                .all(|(level, number)| context.get(*level) == Some(&Value::Int(*number)))
        };
        self.depth_first_search(&key, None).ok_or_else(|| {
            ExptError::State(
                ErrorInfo::new("subsection-not-found", "could not find the specified section")
                    .with_context(
                        "numbers",
                        numbers
                            .iter()
                            .map(|(level, number)| format!("{level}={number}"))
                            .collect::<Vec<_>>()
                            .join(","),
                    ),
            )
        })
    }

    /// The single section identified by `(level, number)` pairs.
    pub fn subsection(&self, numbers: &[(&str, i64)]) -> Result<&Section, ExptError> {
        let path = self.locate(numbers)?;
        self.section(&path)
    }

    /// Every section at the deepest level named in `numbers`.
    ///
    /// Levels without an entry are descended into completely.
    pub fn all_subsections(
        &self,
        numbers: &[(&str, Positions)],
    ) -> Result<Vec<Vec<usize>>, ExptError> {
        let mut found = Vec::new();
        collect_subsections(self, numbers, &mut Vec::new(), &mut found)?;
        Ok(found)
    }

    /// First section at `level` not yet started (or, with `by_started`
    /// false, not yet finished), following only such sections.
    pub fn find_first_not_run(&self, level: &str, by_started: bool) -> Option<Vec<usize>> {
        let key = |section: &Section, _: &Data| section.level() == level;
        let path_key = |section: &Section, _: &Data| {
            if by_started {
                !section.has_started()
            } else {
                !section.has_finished()
            }
        };
        self.depth_first_search(&key, Some(&path_key))
    }

    /// First section at `level` that started but did not finish.
    pub fn find_first_partially_run(&self, level: &str) -> Option<Vec<usize>> {
        let key = |section: &Section, _: &Data| section.level() == level;
        let path_key =
            |section: &Section, _: &Data| section.has_started() && !section.has_finished();
        self.depth_first_search(&key, Some(&path_key))
    }
}

fn dfs(
    section: &Section,
    context: &Data,
    key: Predicate<'_>,
    path_key: Option<Predicate<'_>>,
    path: &mut Vec<usize>,
) -> bool {
    let allowed = |node: &Section, data: &Data| path_key.map_or(true, |pred| pred(node, data));
    if key(section, context) && allowed(section, context) {
        return true;
    }
    for (idx, child) in section.children().iter().enumerate() {
        let mut child_context = context.clone();
        overlay(&mut child_context, child.data());
        if !allowed(child, &child_context) {
            continue;
        }
        path.push(idx);
        if dfs(child, &child_context, key, path_key, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn collect_subsections(
    section: &Section,
    numbers: &[(&str, Positions)],
    path: &mut Vec<usize>,
    found: &mut Vec<Vec<usize>>,
) -> Result<(), ExptError> {
    let selected = section
        .child_level()
        .and_then(|level| numbers.iter().position(|(name, _)| *name == level));
    match selected {
        Some(entry) => {
            let remaining: Vec<(&str, Positions)> = numbers
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != entry)
                .map(|(_, (name, positions))| (*name, positions.clone()))
                .collect();
            for &position in numbers[entry].1.as_slice() {
                let idx = section.path_of(&[position])?[0];
                path.push(idx);
                if remaining.is_empty() {
                    found.push(path.clone());
                } else {
                    collect_subsections(&section.children()[idx], &remaining, path, found)?;
                }
                path.pop();
            }
        }
        None => {
            for (idx, child) in section.children().iter().enumerate() {
                path.push(idx);
                collect_subsections(child, numbers, path, found)?;
                path.pop();
            }
        }
    }
    Ok(())
}
