//! Watch root normalization
//!
//! Backends report events under the real path of the watch root. When the
//! requested path is a symbolic link or uses a different casing than the
//! disk, events are rewritten back to the requested form.

use crate::platform;
use std::path::{Path, PathBuf};
use tracing::trace;
use tw_core::path::{rebase, IGNORE_CASE};

/// Resolved form of a watch root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    /// Path handed to the backend
    pub real_path: PathBuf,
    /// Whether `real_path` differs from the requested path
    pub differs: bool,
    /// Length of the path events are reported under
    pub real_path_len: usize,
}

impl NormalizedPath {
    /// The requested path, used as-is
    pub fn unchanged(path: &Path) -> Self {
        Self {
            real_path: path.to_path_buf(),
            differs: false,
            real_path_len: path.as_os_str().len(),
        }
    }

    /// Rewrite a backend path to the requested form
    pub fn rewrite(&self, path: PathBuf, requested: &Path) -> PathBuf {
        if !self.differs {
            return path;
        }
        rebase(&path, &self.real_path, requested, IGNORE_CASE).unwrap_or(path)
    }
}

/// Resolve symbolic links and on-disk casing of `path`
///
/// Falls back to the requested path if resolution fails.
pub async fn normalize_path(path: &Path, verbose: bool) -> NormalizedPath {
    let mut real_path = match tokio::fs::canonicalize(path).await {
        Ok(real_path) => platform::strip_verbatim(real_path),
        Err(_) => return NormalizedPath::unchanged(path),
    };

    // Casing only needs fixing when no symlink was involved
    if IGNORE_CASE && real_path == path {
        let requested = path.to_path_buf();
        if let Ok(Some(cased)) =
            tokio::task::spawn_blocking(move || platform::realcase(&requested)).await
        {
            real_path = cased;
        }
    }

    if real_path == path {
        return NormalizedPath::unchanged(path);
    }

    if verbose {
        trace!(
            "correcting a path to watch that seems to be a symbolic link or wrong casing (original: {}, real: {})",
            path.display(),
            real_path.display()
        );
    }

    NormalizedPath {
        real_path_len: real_path.as_os_str().len(),
        real_path,
        differs: true,
    }
}
