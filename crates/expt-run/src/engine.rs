//! Running and resuming sections.
//!
//! A run enters every ancestor of the target section (start hooks, root
//! first), walks the target depth-first calling the bottom-level run callback
//! and the inter hooks, then leaves the entered ancestors in reverse order.
//! End hooks run on every exit path, including errors and quit requests; the
//! first error wins and later end-hook failures are only logged.

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::Data;
use tracing::{debug, info, warn};

use crate::callbacks::{BoundCallbacks, LevelHook, SessionState};
use crate::experiment::{Experiment, RunOptions};
use crate::section::{overlay, Section};

struct Runner<'a> {
    session: &'a mut SessionState,
    persistent: &'a mut Data,
    hooks: &'a BoundCallbacks,
    demo: bool,
}

impl Runner<'_> {
    fn call_level(&mut self, level: &str, hook: LevelHook, context: &Data) -> Result<(), ExptError> {
        let hooks = self.hooks;
        match hooks.level(level, hook) {
            Some(callback) => {
                debug!(level, ?hook, "calling level callback");
                callback(&mut *self.session, &mut *self.persistent, context)
            }
            None => Ok(()),
        }
    }

    fn run_node(&mut self, node: &mut Section, parent_context: &Data, from: &[usize]) -> Result<(), ExptError> {
        let mut context = parent_context.clone();
        overlay(&mut context, node.data());
        let level = node.level().to_string();
        debug!(section = %node.description(), "entering section");
        if !self.demo {
            node.mark_started();
        }
        self.call_level(&level, LevelHook::Start, &context)?;

        let body = self.run_body(node, &context, from);
        if body.is_ok() && !self.demo {
            node.mark_finished();
        }
        let end = self.call_level(&level, LevelHook::End, &context);
        debug!(section = %node.description(), ok = body.is_ok(), "leaving section");
        match (body, end) {
            (Err(err), Err(end_err)) => {
                warn!(error = %end_err, level = %level, "end callback failed after an earlier error");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), end) => end,
        }
    }

    fn run_body(&mut self, node: &mut Section, context: &Data, from: &[usize]) -> Result<(), ExptError> {
        if node.is_bottom_level() {
            let hooks = self.hooks;
            let Some(callback) = hooks.run() else {
                return Ok(());
            };
            let results = callback(&mut *self.session, &mut *self.persistent, context)?;
            debug!(section = %node.description(), entries = results.len(), "run callback returned");
            if !self.demo {
                node.add_data(results);
            }
            return Ok(());
        }

        let (first, rest) = match from.split_first() {
            Some((&first, rest)) => (first, rest),
            None => (1, &[][..]),
        };
        if first == 0 {
            return Err(ExptError::State(
                ErrorInfo::new("zero-index", "section positions are 1-based")
                    .with_context("section", node.description()),
            ));
        }
        let len = node.len();
        if first > len.max(1) {
            return Err(ExptError::State(
                ErrorInfo::new("from-section-out-of-range", "no child at the start position")
                    .with_context("section", node.description())
                    .with_context("position", first.to_string())
                    .with_context("children", len.to_string()),
            ));
        }
        let start = first - 1;
        let level = node.level().to_string();
        for idx in start..len {
            if idx > start {
                self.call_level(&level, LevelHook::Inter, context)?;
            }
            let child_from = if idx == start { rest } else { &[] };
            self.run_node(&mut node.children_mut()[idx], context, child_from)?;
        }
        Ok(())
    }
}

impl Experiment {
    /// Runs the section at the 0-based index `path`.
    ///
    /// Outside demo mode, started and finished flags and run callback results
    /// are recorded; ancestors whose children have all finished are marked
    /// finished too.
    pub fn run_section(&mut self, path: &[usize], options: &RunOptions) -> Result<(), ExptError> {
        if self.bound.is_none() && !self.callbacks.is_empty() {
            return Err(ExptError::Callback(
                ErrorInfo::new("callbacks-unbound", "callback keys have not been resolved")
                    .with_hint("call bind with the host registry before running"),
            ));
        }
        self.root.section(path)?;

        let Experiment {
            root,
            session,
            persistent,
            bound,
            ..
        } = self;
        let hooks: &BoundCallbacks = bound.get_or_insert_with(BoundCallbacks::default);
        let mut runner = Runner {
            session,
            persistent,
            hooks,
            demo: options.demo,
        };

        let mut outcome = Ok(());
        let mut entered: Vec<(String, Data)> = Vec::new();
        let mut context = Data::new();
        for depth in 0..path.len() {
            let Some(ancestor) = root.get_mut(&path[..depth]) else {
                break;
            };
            overlay(&mut context, ancestor.data());
            if !options.parent_callbacks {
                continue;
            }
            if !options.demo {
                ancestor.mark_started();
            }
            debug!(section = %ancestor.description(), "entering parent section");
            let level = ancestor.level().to_string();
            if let Err(err) = runner.call_level(&level, LevelHook::Start, &context) {
                outcome = Err(err);
                break;
            }
            entered.push((level, context.clone()));
        }

        if outcome.is_ok() {
            if let Some(target) = root.get_mut(path) {
                outcome = runner.run_node(target, &context, &options.from_section);
            }
        }

        for (level, context) in entered.iter().rev() {
            debug!(level = %level, "leaving parent section");
            if let Err(err) = runner.call_level(level, LevelHook::End, context) {
                if outcome.is_ok() {
                    outcome = Err(err);
                } else {
                    warn!(error = %err, level = %level, "parent end callback failed after an earlier error");
                }
            }
        }

        match &outcome {
            Ok(()) if !options.demo => propagate_finished(root, path),
            Err(err) if err.is_quit() => info!(reason = %err, "session quit"),
            _ => {}
        }
        outcome
    }

    /// Continues the started, unfinished section at `path` from its first
    /// unfinished descendant.
    pub fn resume_section(&mut self, path: &[usize], options: &RunOptions) -> Result<(), ExptError> {
        let section = self.root.section(path)?;
        let rejected = |code: &str, message: &str| {
            ExptError::State(
                ErrorInfo::new(code, message).with_context("section", section.description()),
            )
        };
        if section.is_bottom_level() {
            return Err(rejected(
                "resume-bottom-level",
                "bottom-level sections cannot be resumed",
            ));
        }
        if !section.has_started() {
            return Err(rejected("resume-not-started", "section has not been started"));
        }
        if section.has_finished() {
            return Err(rejected("resume-finished", "section has already finished"));
        }
        let from_section = resume_address(section);
        debug!(section = %section.description(), ?from_section, "resuming");
        let options = RunOptions {
            from_section,
            ..options.clone()
        };
        self.run_section(path, &options)
    }
}

/// 1-based start positions that skip every finished descendant.
pub fn resume_address(section: &Section) -> Vec<usize> {
    let mut address = Vec::new();
    let mut current = section;
    while !current.is_bottom_level() {
        match current.children().iter().position(|child| !child.has_finished()) {
            Some(idx) => {
                address.push(idx + 1);
                current = &current.children()[idx];
            }
            None => break,
        }
    }
    address
}

fn propagate_finished(root: &mut Section, path: &[usize]) {
    for depth in (0..path.len()).rev() {
        let Some(ancestor) = root.get_mut(&path[..depth]) else {
            continue;
        };
        if !ancestor.is_empty() && ancestor.children().iter().all(Section::has_finished) {
            ancestor.mark_finished();
        }
    }
}
