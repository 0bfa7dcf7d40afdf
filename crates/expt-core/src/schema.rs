//! Version tag written into every saved experiment.

use serde::{Deserialize, Serialize};

/// `major.minor.patch` version of the snapshot layout.
///
/// Readers accept any snapshot with the same major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Bumped when older readers can no longer load the layout.
    pub major: u32,
    /// Bumped for added optional fields.
    pub minor: u32,
    /// Bumped for fixes that do not change the layout.
    pub patch: u32,
}

impl SchemaVersion {
    /// Version from its three parts.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a snapshot written as `other` can be read as `self`.
    pub fn is_compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
