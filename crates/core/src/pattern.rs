//! Include/exclude pattern sets
//!
//! Patterns use gitignore glob syntax relative to the watch root
//! (`**/node_modules/**`, `*.log`, `build/`). Absolute patterns are
//! supported too: plain absolute paths match that path and everything below
//! it, absolute globs under the watch root are anchored to the root.

use crate::path::{is_equal_or_parent, IGNORE_CASE};
use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

/// Compiled set of patterns for one watch root
#[derive(Debug, Clone)]
pub struct PatternSet {
    /// Watch root the relative patterns apply to
    root: PathBuf,
    /// Glob matcher
    matcher: Gitignore,
    /// Plain absolute paths
    prefixes: Vec<PathBuf>,
}

fn has_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

impl PatternSet {
    /// Compile patterns for the given watch root
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        builder
            .case_insensitive(IGNORE_CASE)
            .context("Failed to configure pattern matcher")?;

        let mut prefixes = Vec::new();
        for pattern in patterns {
            let candidate = Path::new(pattern);
            if candidate.is_absolute() {
                if !has_glob(pattern) {
                    prefixes.push(candidate.to_path_buf());
                    continue;
                }
                // Globs outside of the root can never match an event path
                let Ok(relative) = candidate.strip_prefix(root) else {
                    continue;
                };
                builder
                    .add_line(None, &format!("/{}", relative.to_string_lossy()))
                    .with_context(|| format!("Invalid pattern: {}", pattern))?;
            } else {
                builder
                    .add_line(None, pattern)
                    .with_context(|| format!("Invalid pattern: {}", pattern))?;
            }
        }

        let matcher = builder.build().context("Failed to build pattern matcher")?;

        Ok(Self {
            root: root.to_path_buf(),
            matcher,
            prefixes,
        })
    }

    /// Whether no patterns were given
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.matcher.is_empty()
    }

    /// Check if an absolute path matches any pattern
    ///
    /// A path also matches when one of its ancestors below the root does.
    pub fn matches(&self, path: &Path) -> bool {
        if self
            .prefixes
            .iter()
            .any(|prefix| is_equal_or_parent(path, prefix, IGNORE_CASE))
        {
            return true;
        }

        let relative = match path.strip_prefix(&self.root) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => return false,
        };

        self.matcher
            .matched_path_or_any_parents(relative, false)
            .is_ignore()
    }
}
