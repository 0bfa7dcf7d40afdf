//! Structured error types shared across expt crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`ExptError`] family except quit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (level names, indices, sizes, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

/// Voluntary request to leave the running session.
///
/// Raised from a callback (for example when the participant presses a quit
/// key). The engine propagates it untouched and leaves the active sections
/// started but unfinished so the run can be resumed later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuitSignal {
    /// Message explaining why the session was left.
    pub message: String,
}

impl Display for QuitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Canonical error type for expt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum ExptError {
    /// Invalid design, ordering or tree specification.
    #[error("specification error: {0}")]
    Spec(ErrorInfo),
    /// Operation called on a section in the wrong state, or a failed lookup.
    #[error("state error: {0}")]
    State(ErrorInfo),
    /// Callback resolution failures and errors raised by host callbacks.
    #[error("callback error: {0}")]
    Callback(ErrorInfo),
    /// Serialization, snapshot and export failures.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// Voluntary abort requested by a callback.
    #[error("session quit: {0}")]
    Quit(QuitSignal),
}

impl ExptError {
    /// Builds the voluntary quit signal with a human readable message.
    pub fn quit(message: impl Into<String>) -> Self {
        ExptError::Quit(QuitSignal {
            message: message.into(),
        })
    }

    /// Returns true when this is the voluntary quit signal.
    pub fn is_quit(&self) -> bool {
        matches!(self, ExptError::Quit(_))
    }

    /// Returns the structured payload, or `None` for the quit signal.
    pub fn info(&self) -> Option<&ErrorInfo> {
        match self {
            ExptError::Spec(info)
            | ExptError::State(info)
            | ExptError::Callback(info)
            | ExptError::Serde(info) => Some(info),
            ExptError::Quit(_) => None,
        }
    }

    /// Returns the stable error code (`"quit"` for the quit signal).
    pub fn code(&self) -> &str {
        match self {
            ExptError::Quit(_) => "quit",
            other => other.info().map(|info| info.code.as_str()).unwrap_or(""),
        }
    }
}
