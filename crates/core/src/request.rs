//! Watch requests

use crate::event::FileChangeKind;
use crate::path::path_key;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exclude pattern that excludes everything below the watch root
pub const GLOBSTAR: &str = "**";

/// Change kinds a correlated request does not want to hear about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    #[serde(default)]
    pub ignore_added: bool,
    #[serde(default)]
    pub ignore_updated: bool,
    #[serde(default)]
    pub ignore_deleted: bool,
}

impl ChangeFilter {
    /// Check if events of this kind are dropped by the filter
    pub fn is_filtered(&self, kind: FileChangeKind) -> bool {
        match kind {
            FileChangeKind::Added => self.ignore_added,
            FileChangeKind::Updated => self.ignore_updated,
            FileChangeKind::Deleted => self.ignore_deleted,
        }
    }
}

/// A caller's interest in changes below one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    /// Absolute directory to watch recursively
    pub path: PathBuf,

    /// Glob patterns to exclude
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Glob patterns to include (None = everything under `path`)
    #[serde(default)]
    pub includes: Option<Vec<String>>,

    /// Requests sharing a correlation id are deduplicated together
    #[serde(default)]
    pub correlation_id: Option<u64>,

    /// Forces snapshot polling at this interval
    #[serde(default)]
    pub polling_interval: Option<Duration>,

    /// Per-kind filter, only honored for correlated requests
    #[serde(default)]
    pub filter: Option<ChangeFilter>,
}

impl WatchRequest {
    /// Create a request watching everything under `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            excludes: Vec::new(),
            includes: None,
            correlation_id: None,
            polling_interval: None,
            filter: None,
        }
    }

    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes = excludes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = Some(includes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_correlation(mut self, correlation_id: u64) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    pub fn with_filter(mut self, filter: ChangeFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn is_correlated(&self) -> bool {
        self.correlation_id.is_some()
    }

    /// Whether the whole root is excluded via the `**` pattern
    pub fn excludes_everything(&self) -> bool {
        self.excludes.iter().any(|exclude| exclude == GLOBSTAR)
    }

    /// Key of the watcher serving this request
    pub fn key(&self) -> WatcherKey {
        match self.correlation_id {
            Some(id) => WatcherKey::Correlation(id),
            None => WatcherKey::Path(path_key(&self.path)),
        }
    }

    /// Whether a running watcher for `self` can keep serving `other`
    ///
    /// Pattern lists are compared as sets; order does not matter.
    pub fn same_watch_config(&self, other: &WatchRequest) -> bool {
        patterns_equal(Some(&self.excludes), Some(&other.excludes))
            && patterns_equal(self.includes.as_ref(), other.includes.as_ref())
            && self.polling_interval == other.polling_interval
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for WatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if !self.excludes.is_empty() {
            write!(f, " (excludes: {})", self.excludes.join(","))?;
        }
        if let Some(includes) = &self.includes {
            if !includes.is_empty() {
                write!(f, " (includes: {})", includes.join(","))?;
            }
        }
        if let Some(id) = self.correlation_id {
            write!(f, " (correlationId: {})", id)?;
        }
        if let Some(interval) = self.polling_interval {
            write!(f, " (polling: {}ms)", interval.as_millis())?;
        }
        Ok(())
    }
}

/// Identity of a watcher instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatcherKey {
    /// Correlated request
    Correlation(u64),
    /// Uncorrelated request, keyed by (case-folded) path
    Path(String),
}

/// Compare two optional pattern lists as sets
///
/// A missing list equals an empty one.
pub fn patterns_equal(a: Option<&Vec<String>>, b: Option<&Vec<String>>) -> bool {
    let a: HashSet<&str> = a.into_iter().flatten().map(String::as_str).collect();
    let b: HashSet<&str> = b.into_iter().flatten().map(String::as_str).collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefers_correlation() {
        let request = WatchRequest::new("/ws").with_correlation(7);
        assert_eq!(request.key(), WatcherKey::Correlation(7));

        let request = WatchRequest::new("/ws");
        assert_eq!(request.key(), WatcherKey::Path(path_key(Path::new("/ws"))));
    }

    #[test]
    fn test_patterns_equal_ignores_order() {
        let a = vec!["a".to_string(), "b".to_string()];
        let b = vec!["b".to_string(), "a".to_string()];
        assert!(patterns_equal(Some(&a), Some(&b)));

        let c = vec!["a".to_string()];
        assert!(!patterns_equal(Some(&a), Some(&c)));

        assert!(patterns_equal(None, Some(&Vec::new())));
        assert!(!patterns_equal(None, Some(&c)));
    }

    #[test]
    fn test_same_watch_config() {
        let a = WatchRequest::new("/ws").with_excludes(["x", "y"]);
        let b = WatchRequest::new("/ws").with_excludes(["y", "x"]);
        assert!(a.same_watch_config(&b));

        let c = b.clone().with_polling_interval(Duration::from_secs(1));
        assert!(!a.same_watch_config(&c));

        let d = a.clone().with_includes(["*.rs"]);
        assert!(!a.same_watch_config(&d));
    }

    #[test]
    fn test_excludes_everything() {
        assert!(WatchRequest::new("/ws").with_excludes(["**"]).excludes_everything());
        assert!(!WatchRequest::new("/ws").with_excludes(["**/x"]).excludes_everything());
    }

    #[test]
    fn test_change_filter() {
        let filter = ChangeFilter {
            ignore_updated: true,
            ..Default::default()
        };
        assert!(filter.is_filtered(FileChangeKind::Updated));
        assert!(!filter.is_filtered(FileChangeKind::Added));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: WatchRequest = serde_json::from_str(r#"{"path": "/ws"}"#).unwrap();
        assert_eq!(request, WatchRequest::new("/ws"));
    }

    #[test]
    fn test_display() {
        let request = WatchRequest::new("/ws").with_excludes(["*.log"]).with_correlation(2);
        assert_eq!(request.to_string(), "/ws (excludes: *.log) (correlationId: 2)");
    }
}
