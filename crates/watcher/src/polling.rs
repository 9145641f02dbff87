//! Polling fallback
//!
//! Watches a subtree without native notifications: on every tick the
//! subtree is walked and compared to the snapshot of the previous tick,
//! which is kept in a temporary file between ticks.
//!
//! Only the first tick differs: it writes the initial snapshot and marks the
//! watcher ready, there is nothing to compare against yet.

use crate::backend::BackendSink;
use crate::error::BackendError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempPath;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tw_core::{PatternSet, RawEvent};
use walkdir::WalkDir;

/// State of one entry at snapshot time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryState {
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// All entries below a root, keyed by absolute path
pub type Snapshot = BTreeMap<PathBuf, EntryState>;

/// A running polling watcher
#[derive(Debug)]
pub struct PollingHandle {
    task: JoinHandle<()>,
    token: CancellationToken,
    snapshot: TempPath,
}

impl PollingHandle {
    /// Stop polling and delete the snapshot file
    pub async fn stop(self) {
        self.token.cancel();
        // A walk in progress gives up at the next entry; the snapshot file
        // is not written after the task ends
        if let Err(e) = self.task.await {
            debug!("Polling task ended abnormally: {}", e);
        }
        if let Err(e) = self.snapshot.close() {
            debug!("Failed to remove polling snapshot: {}", e);
        }
    }
}

/// Start polling `root` every `interval`
pub fn start_polling(
    root: PathBuf,
    excludes: Option<PatternSet>,
    every: Duration,
    sink: BackendSink,
    token: CancellationToken,
) -> Result<PollingHandle> {
    let snapshot = tempfile::Builder::new()
        .prefix("treewatch-snapshot-")
        .tempfile()
        .context("Failed to create polling snapshot file")?
        .into_temp_path();

    let snapshot_path = snapshot.to_path_buf();
    let task_token = token.clone();
    let excludes = excludes.map(Arc::new);
    let task = tokio::spawn(async move {
        poll_loop(root, excludes, every, snapshot_path, sink, task_token).await;
    });

    Ok(PollingHandle {
        task,
        token,
        snapshot,
    })
}

async fn poll_loop(
    root: PathBuf,
    excludes: Option<Arc<PatternSet>>,
    every: Duration,
    snapshot_path: PathBuf,
    sink: BackendSink,
    token: CancellationToken,
) {
    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first = true;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = timer.tick() => {}
        }

        if !first && tokio::fs::metadata(&root).await.is_err() {
            sink.events(vec![RawEvent::deleted(root.clone())]);
            break;
        }

        let result = tick(&root, excludes.clone(), &snapshot_path, first, &token).await;
        if token.is_cancelled() {
            break;
        }

        match result {
            Ok(events) => sink.events(events),
            Err(e) => {
                warn!(path = %root.display(), "Polling failed: {:#}", e);
                sink.error(BackendError::Other(format!("{:#}", e)));
                break;
            }
        }

        if first {
            first = false;
            sink.ready();
        }
    }
}

/// Take a snapshot, diff it against the stored one and store the new one
async fn tick(
    root: &Path,
    excludes: Option<Arc<PatternSet>>,
    snapshot_path: &Path,
    first: bool,
    token: &CancellationToken,
) -> Result<Vec<RawEvent>> {
    let root = root.to_path_buf();
    let snapshot_path = snapshot_path.to_path_buf();
    let token = token.clone();

    tokio::task::spawn_blocking(move || {
        // Stopped mid-walk, the caller drops whatever this returns
        let Some(current) = snapshot_until(&root, excludes.as_deref(), &token)? else {
            return Ok(Vec::new());
        };
        let events = if first {
            Vec::new()
        } else {
            let previous = read_snapshot(&snapshot_path)?;
            diff_snapshots(&previous, &current)
        };
        write_snapshot(&snapshot_path, &current)?;
        Ok(events)
    })
    .await
    .context("Polling task panicked")?
}

/// Walk `root` without following links
///
/// Excluded directories are not descended into.
pub fn take_snapshot(root: &Path, excludes: Option<&PatternSet>) -> Result<Snapshot> {
    snapshot_until(root, excludes, &CancellationToken::new()).map(Option::unwrap_or_default)
}

/// Like [`take_snapshot`], but gives up with `None` once `token` is cancelled
pub fn snapshot_until(
    root: &Path,
    excludes: Option<&PatternSet>,
    token: &CancellationToken,
) -> Result<Option<Snapshot>> {
    let mut snapshot = Snapshot::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !excludes.is_some_and(|excludes| excludes.matches(e.path())))
    {
        if token.is_cancelled() {
            return Ok(None);
        }

        let entry = match entry {
            Ok(entry) => entry,
            // Entries can vanish while walking
            Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => {
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to walk {}", root.display()));
            }
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        snapshot.insert(
            entry.into_path(),
            EntryState {
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified: metadata.modified().ok(),
            },
        );
    }

    Ok(Some(snapshot))
}

/// Changes between two snapshots
///
/// Directories only report creation and deletion.
pub fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> Vec<RawEvent> {
    let mut events = Vec::new();

    for (path, state) in previous {
        match current.get(path) {
            None => events.push(RawEvent::deleted(path.clone())),
            Some(now) if !(state.is_dir && now.is_dir) && state != now => {
                events.push(RawEvent::updated(path.clone()));
            }
            Some(_) => {}
        }
    }

    for path in current.keys() {
        if !previous.contains_key(path) {
            events.push(RawEvent::created(path.clone()));
        }
    }

    events
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    bincode::deserialize(&bytes).context("Failed to decode snapshot")
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let bytes = bincode::serialize(snapshot).context("Failed to encode snapshot")?;
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{InstanceId, Signal};
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tw_core::RawEventKind;

    #[test]
    fn test_diff_detects_changes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("kept.txt"), b"same")?;
        fs::write(root.join("changed.txt"), b"old")?;
        fs::write(root.join("removed.txt"), b"bye")?;
        fs::create_dir(root.join("dir"))?;

        let before = take_snapshot(root, None)?;

        fs::write(root.join("changed.txt"), b"new content")?;
        fs::remove_file(root.join("removed.txt"))?;
        fs::write(root.join("added.txt"), b"hi")?;
        fs::write(root.join("dir/inner.txt"), b"x")?;

        let after = take_snapshot(root, None)?;
        let mut events = diff_snapshots(&before, &after);
        events.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(
            events,
            vec![
                RawEvent::created(root.join("added.txt")),
                RawEvent::updated(root.join("changed.txt")),
                RawEvent::created(root.join("dir/inner.txt")),
                RawEvent::deleted(root.join("removed.txt")),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_mtime_only_change_is_update() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, b"same")?;
        set_file_mtime(&file, FileTime::from_unix_time(1_000_000, 0))?;

        let before = take_snapshot(temp_dir.path(), None)?;
        set_file_mtime(&file, FileTime::from_unix_time(2_000_000, 0))?;
        let after = take_snapshot(temp_dir.path(), None)?;

        assert_eq!(diff_snapshots(&before, &after), vec![RawEvent::updated(file)]);
        Ok(())
    }

    #[test]
    fn test_snapshot_skips_excluded() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("node_modules"))?;
        fs::write(root.join("node_modules/pkg.js"), b"x")?;
        fs::write(root.join("main.js"), b"x")?;

        let excludes = PatternSet::new(root, &["node_modules".to_string()])?;
        let snapshot = take_snapshot(root, Some(&excludes))?;

        assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec![root.join("main.js")]);
        Ok(())
    }

    #[test]
    fn test_cancelled_walk_gives_up() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"x")?;

        let token = CancellationToken::new();
        assert!(snapshot_until(temp_dir.path(), None, &token)?.is_some());

        token.cancel();
        assert!(snapshot_until(temp_dir.path(), None, &token)?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_next_tick() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = start_polling(
            temp_dir.path().to_path_buf(),
            None,
            Duration::from_secs(3600),
            BackendSink::new(InstanceId(1), tx),
            CancellationToken::new(),
        )?;

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
        assert!(matches!(signal, Some(Signal::Ready { .. })));

        tokio::time::timeout(Duration::from_secs(1), handle.stop()).await?;
        Ok(())
    }

    #[test]
    fn test_snapshot_file_roundtrip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"x")?;
        let snapshot = take_snapshot(temp_dir.path(), None)?;

        let file = temp_dir.path().join("snapshot.bin");
        write_snapshot(&file, &snapshot)?;
        assert_eq!(read_snapshot(&file)?, snapshot);
        Ok(())
    }

    #[tokio::test]
    async fn test_polling_reports_ready_then_changes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let handle = start_polling(
            root.clone(),
            None,
            Duration::from_millis(50),
            BackendSink::new(InstanceId(1), tx),
            token,
        )?;
        let snapshot_file = handle.snapshot.to_path_buf();

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
        assert!(matches!(signal, Some(Signal::Ready { .. })));
        assert!(snapshot_file.exists());

        fs::write(root.join("new.txt"), b"x")?;

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
        match signal {
            Some(Signal::Events { events, .. }) => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].kind, RawEventKind::Created);
                assert_eq!(events[0].path, root.join("new.txt"));
            }
            other => panic!("expected events, got {:?}", other),
        }

        handle.stop().await;
        assert!(!snapshot_file.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_polling_reports_root_deletion() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("ws");
        fs::create_dir(&root)?;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = start_polling(
            root.clone(),
            None,
            Duration::from_millis(50),
            BackendSink::new(InstanceId(1), tx),
            CancellationToken::new(),
        )?;

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
        assert!(matches!(signal, Some(Signal::Ready { .. })));

        fs::remove_dir(&root)?;

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
        match signal {
            Some(Signal::Events { events, .. }) => assert_eq!(events, vec![RawEvent::deleted(root)]),
            other => panic!("expected root deletion, got {:?}", other),
        }

        handle.stop().await;
        Ok(())
    }
}
