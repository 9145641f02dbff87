//! Shared utilities for the CLI

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tw_core::{FileChangeEvent, FileChangeKind};
use watcher::WatcherConfig;

/// Default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("treewatch").join("config.toml"))
}

/// Load the configuration
///
/// An explicit path must exist. Without one the default location is used
/// if present, built-in defaults otherwise.
pub fn load_config(explicit: Option<&Path>) -> Result<WatcherConfig> {
    if let Some(path) = explicit {
        return WatcherConfig::load(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => WatcherConfig::load(&path),
        _ => Ok(WatcherConfig::default()),
    }
}

/// Render one event for stdout
pub fn format_event(event: &FileChangeEvent, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string(event).context("Failed to serialize event");
    }

    let label = event.kind.to_string();
    let label = match event.kind {
        FileChangeKind::Added => label.green().to_string(),
        FileChangeKind::Updated => label.yellow().to_string(),
        FileChangeKind::Deleted => label.red().to_string(),
    };
    Ok(format!("{} {}", label, event.resource.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_config_loaded() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "coalesce_delay_ms = 40\n")?;

        let config = load_config(Some(&path))?;
        assert_eq!(config.coalesce_delay_ms, 40);
        Ok(())
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        assert!(load_config(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn test_format_event_json() -> Result<()> {
        let event = FileChangeEvent::new(FileChangeKind::Added, "/ws/a.txt", Some(3));
        let line = format_event(&event, true)?;

        let value: serde_json::Value = serde_json::from_str(&line)?;
        assert_eq!(value["kind"], "Added");
        assert_eq!(value["resource"], "/ws/a.txt");
        assert_eq!(value["correlation_id"], 3);
        Ok(())
    }

    #[test]
    fn test_format_event_text() -> Result<()> {
        let event = FileChangeEvent::new(FileChangeKind::Deleted, "/ws/old", None);
        let line = format_event(&event, false)?;
        assert!(line.contains("[DELETED]"));
        assert!(line.ends_with("/ws/old"));
        Ok(())
    }
}
