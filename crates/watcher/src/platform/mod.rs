//! Platform-specific path quirks
//!
//! - Directories that must never be watched (predefined excludes)
//! - On-disk casing of a path on case-insensitive file systems
//! - Backend path fix-ups (NFC on macOS, drive roots on Windows)

use std::path::{Path, PathBuf};

/// Excludes added to every backend subscription on this platform
pub fn predefined_excludes() -> Vec<String> {
    #[cfg(target_os = "macos")]
    {
        // Watching this triggers an access dialog from macOS 14
        if let Some(home) = dirs::home_dir() {
            return vec![home
                .join("Library")
                .join("Containers")
                .to_string_lossy()
                .into_owned()];
        }
    }

    Vec::new()
}

/// Merge request excludes with the predefined ones, keeping order and dropping duplicates
pub fn with_predefined_excludes(excludes: &[String], predefined: &[String]) -> Vec<String> {
    let mut merged = excludes.to_vec();
    for exclude in predefined {
        if !merged.contains(exclude) {
            merged.push(exclude.clone());
        }
    }
    merged
}

/// Resolve the on-disk casing of an existing path
///
/// Returns None if any component cannot be found.
pub fn realcase(path: &Path) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        let name = match component {
            std::path::Component::Normal(name) => name,
            other => {
                resolved.push(other.as_os_str());
                continue;
            }
        };

        let wanted = name.to_string_lossy().to_lowercase();
        let parent = if resolved.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            resolved.clone()
        };

        let mut found = None;
        for entry in std::fs::read_dir(&parent).ok()?.flatten() {
            let entry_name = entry.file_name();
            if entry_name == name {
                found = Some(entry_name);
                break;
            }
            if found.is_none() && entry_name.to_string_lossy().to_lowercase() == wanted {
                found = Some(entry_name);
            }
        }
        resolved.push(found?);
    }
    Some(resolved)
}

/// Strip the `\\?\` prefix `canonicalize` produces on Windows
pub fn strip_verbatim(path: PathBuf) -> PathBuf {
    #[cfg(windows)]
    {
        let raw = path.to_string_lossy();
        if let Some(stripped) = raw.strip_prefix(r"\\?\") {
            if !stripped.starts_with("UNC") {
                return PathBuf::from(stripped);
            }
        }
    }
    path
}

/// Fix up a path reported by a backend before it is matched or rewritten
pub fn normalize_event_path(path: PathBuf, watch_root: &Path) -> PathBuf {
    #[cfg(target_os = "macos")]
    let path = {
        // On-disk names are NFD, callers expect NFC
        use unicode_normalization::UnicodeNormalization;
        match path.to_str() {
            Some(raw) => PathBuf::from(raw.nfc().collect::<String>()),
            None => path,
        }
    };

    #[cfg(windows)]
    let path = {
        // Watching a drive root reports paths with doubled separators
        if watch_root.as_os_str().len() <= 3 {
            tw_core::path::lexical_normalize(&path)
        } else {
            path
        }
    };

    let _ = watch_root;
    path
}
