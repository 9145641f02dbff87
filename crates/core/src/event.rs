//! Raw backend events and public change events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of change reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawEventKind {
    /// Path was created
    Created,
    /// Path contents or metadata changed
    Updated,
    /// Path was removed
    Deleted,
}

/// Event as reported by a backend, in the backend's path form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Absolute path (may differ in case or symlink target from the request path)
    pub path: PathBuf,
    /// Type of change
    pub kind: RawEventKind,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: RawEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, RawEventKind::Created)
    }

    pub fn updated(path: impl Into<PathBuf>) -> Self {
        Self::new(path, RawEventKind::Updated)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, RawEventKind::Deleted)
    }
}

/// Kind of change delivered to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileChangeKind {
    Added,
    Updated,
    Deleted,
}

impl From<RawEventKind> for FileChangeKind {
    fn from(kind: RawEventKind) -> Self {
        match kind {
            RawEventKind::Created => FileChangeKind::Added,
            RawEventKind::Updated => FileChangeKind::Updated,
            RawEventKind::Deleted => FileChangeKind::Deleted,
        }
    }
}

impl fmt::Display for FileChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileChangeKind::Added => "[ADDED]",
            FileChangeKind::Updated => "[CHANGED]",
            FileChangeKind::Deleted => "[DELETED]",
        };
        f.write_str(label)
    }
}

/// Public change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    /// Type of change
    pub kind: FileChangeKind,
    /// Absolute path in the form the watch was originally requested with
    pub resource: PathBuf,
    /// Correlation id of the owning request
    pub correlation_id: Option<u64>,
}

impl FileChangeEvent {
    pub fn new(kind: FileChangeKind, resource: impl Into<PathBuf>, correlation_id: Option<u64>) -> Self {
        Self {
            kind,
            resource: resource.into(),
            correlation_id,
        }
    }
}

impl fmt::Display for FileChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.resource.display())
    }
}
