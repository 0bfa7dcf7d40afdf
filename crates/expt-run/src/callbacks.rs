//! Host callbacks addressed by stable string keys.
//!
//! Experiments persist only the keys; a [`CallbackRegistry`] supplied by the
//! host resolves them into closures whenever an experiment is created or
//! loaded.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::Data;
use serde::{Deserialize, Serialize};

/// Bottom-level callback; returned entries are stored in the section's data.
pub type RunCallback =
    Arc<dyn Fn(&mut SessionState, &mut Data, &Data) -> Result<Data, ExptError> + Send + Sync>;

/// Start, inter and end callback of a level.
pub type LevelCallback =
    Arc<dyn Fn(&mut SessionState, &mut Data, &Data) -> Result<(), ExptError> + Send + Sync>;

/// Values that live for one session only and are never saved.
#[derive(Default)]
pub struct SessionState {
    values: BTreeMap<String, Box<dyn Any + Send>>,
    options: Option<String>,
}

impl SessionState {
    /// Stores a value, returning the previous one under the key.
    pub fn insert<T: Any + Send>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Option<Box<dyn Any + Send>> {
        self.values.insert(key.into(), Box::new(value))
    }

    /// Borrows a value if it exists with the requested type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|value| value.downcast_ref())
    }

    /// Mutably borrows a value if it exists with the requested type.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|value| value.downcast_mut())
    }

    /// Removes a value.
    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any + Send>> {
        self.values.remove(key)
    }

    /// Whether a value is stored under the key.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Free-form options passed on the command line for this session.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Replaces the session options.
    pub fn set_options(&mut self, options: Option<String>) {
        self.options = options;
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

/// Host-provided callbacks keyed by name.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    run: BTreeMap<String, RunCallback>,
    level: BTreeMap<String, LevelCallback>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bottom-level run callback.
    pub fn register_run<F>(&mut self, key: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&mut SessionState, &mut Data, &Data) -> Result<Data, ExptError> + Send + Sync + 'static,
    {
        self.run.insert(key.into(), Arc::new(callback));
        self
    }

    /// Registers a level callback usable as start, inter or end hook.
    pub fn register_level<F>(&mut self, key: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&mut SessionState, &mut Data, &Data) -> Result<(), ExptError> + Send + Sync + 'static,
    {
        self.level.insert(key.into(), Arc::new(callback));
        self
    }

    /// Registered run callback keys.
    pub fn run_keys(&self) -> Vec<&str> {
        self.run.keys().map(String::as_str).collect()
    }

    /// Registered level callback keys.
    pub fn level_keys(&self) -> Vec<&str> {
        self.level.keys().map(String::as_str).collect()
    }

    fn resolve_run(&self, key: &str) -> Result<RunCallback, ExptError> {
        self.run
            .get(key)
            .cloned()
            .ok_or_else(|| ExptError::Callback(missing_callback("run", key)))
    }

    fn resolve_level(&self, key: &str, level: &str) -> Result<LevelCallback, ExptError> {
        self.level
            .get(key)
            .cloned()
            .ok_or_else(|| {
                ExptError::Callback(missing_callback("level", key).with_context("level", level))
            })
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("run", &self.run_keys())
            .field("level", &self.level_keys())
            .finish()
    }
}

fn missing_callback(kind: &str, key: &str) -> ErrorInfo {
    ErrorInfo::new("callback-missing", "callback key is not registered")
        .with_context("kind", kind)
        .with_context("key", key)
        .with_hint("register the callback with the host registry before loading")
}

/// Keys of the start, inter and end callbacks of one level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelBinding {
    /// Called when a section at the level is entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Called between consecutive children of a section at the level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inter: Option<String>,
    /// Called when a section at the level is left, on every exit path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// Persisted callback references of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackBinding {
    /// Bottom-level run callback key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Level callback keys by level name.
    #[serde(default)]
    pub levels: BTreeMap<String, LevelBinding>,
}

impl CallbackBinding {
    /// Whether no callback is referenced.
    pub fn is_empty(&self) -> bool {
        self.run.is_none()
            && self.levels.values().all(|binding| {
                binding.start.is_none() && binding.inter.is_none() && binding.end.is_none()
            })
    }

    /// Resolves every key against the registry.
    pub fn bind(&self, registry: &CallbackRegistry) -> Result<BoundCallbacks, ExptError> {
        let run = self
            .run
            .as_deref()
            .map(|key| registry.resolve_run(key))
            .transpose()?;
        let mut levels = BTreeMap::new();
        for (level, binding) in &self.levels {
            let resolve = |key: &Option<String>| {
                key.as_deref()
                    .map(|key| registry.resolve_level(key, level))
                    .transpose()
            };
            levels.insert(
                level.clone(),
                BoundLevel {
                    start: resolve(&binding.start)?,
                    inter: resolve(&binding.inter)?,
                    end: resolve(&binding.end)?,
                },
            );
        }
        Ok(BoundCallbacks { run, levels })
    }
}

/// Which level hook to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelHook {
    /// Entering a section.
    Start,
    /// Between two children.
    Inter,
    /// Leaving a section.
    End,
}

#[derive(Clone, Default)]
pub(crate) struct BoundLevel {
    start: Option<LevelCallback>,
    inter: Option<LevelCallback>,
    end: Option<LevelCallback>,
}

/// Callbacks resolved from a [`CallbackBinding`].
#[derive(Clone, Default)]
pub struct BoundCallbacks {
    run: Option<RunCallback>,
    levels: BTreeMap<String, BoundLevel>,
}

impl BoundCallbacks {
    pub(crate) fn run(&self) -> Option<&RunCallback> {
        self.run.as_ref()
    }

    pub(crate) fn level(&self, level: &str, hook: LevelHook) -> Option<&LevelCallback> {
        let bound = self.levels.get(level)?;
        match hook {
            LevelHook::Start => bound.start.as_ref(),
            LevelHook::Inter => bound.inter.as_ref(),
            LevelHook::End => bound.end.as_ref(),
        }
    }
}

impl fmt::Debug for BoundCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCallbacks")
            .field("run", &self.run.is_some())
            .field("levels", &self.levels.keys().collect::<Vec<_>>())
            .finish()
    }
}
