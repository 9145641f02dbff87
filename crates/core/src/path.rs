//! Path comparison helpers
//!
//! Watch roots and event paths are compared component by component. On every
//! platform except Linux the comparison ignores case, matching how the
//! underlying file systems resolve names.

use std::path::{Component, Path, PathBuf};

/// Whether paths on this platform compare case-insensitively
pub const IGNORE_CASE: bool = !cfg!(target_os = "linux");

/// Key used to detect duplicate paths (lower-cased where case is ignored)
pub fn path_key(path: &Path) -> String {
    let key = path.to_string_lossy();
    if IGNORE_CASE {
        key.to_lowercase()
    } else {
        key.into_owned()
    }
}

fn component_eq(a: Component<'_>, b: Component<'_>, ignore_case: bool) -> bool {
    if ignore_case {
        a.as_os_str().to_string_lossy().to_lowercase() == b.as_os_str().to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

/// Check two paths for equality
pub fn is_equal(a: &Path, b: &Path, ignore_case: bool) -> bool {
    let mut left = a.components();
    let mut right = b.components();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(l), Some(r)) if component_eq(l, r, ignore_case) => continue,
            _ => return false,
        }
    }
}

/// Check whether `candidate` equals `path` or is one of its ancestors
pub fn is_equal_or_parent(path: &Path, candidate: &Path, ignore_case: bool) -> bool {
    let mut inner = path.components();
    for parent_component in candidate.components() {
        match inner.next() {
            Some(c) if component_eq(c, parent_component, ignore_case) => {}
            _ => return false,
        }
    }
    true
}

/// Check whether `candidate` is a strict ancestor of `path`
pub fn is_parent(path: &Path, candidate: &Path, ignore_case: bool) -> bool {
    is_equal_or_parent(path, candidate, ignore_case) && !is_equal(path, candidate, ignore_case)
}

/// Rebase `path` from `from` onto `to`, if `path` lives under `from`
///
/// Used to rewrite backend paths (reported under the resolved real path)
/// back to the form the caller requested.
pub fn rebase(path: &Path, from: &Path, to: &Path, ignore_case: bool) -> Option<PathBuf> {
    if !is_equal_or_parent(path, from, ignore_case) {
        return None;
    }
    let skip = from.components().count();
    let mut rebased = to.to_path_buf();
    for component in path.components().skip(skip) {
        rebased.push(component.as_os_str());
    }
    Some(rebased)
}

/// Lexically normalize a path, collapsing `.` and repeated separators
pub fn lexical_normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
