//! Backend built on the `notify` crate (inotify, FSEvents, ReadDirectoryChangesW)

use super::{BackendHandle, BackendSink, WatchBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::debug;
use tw_core::{PatternSet, RawEvent};

/// Recommended native watcher for the current platform
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl NotifyBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WatchBackend for NotifyBackend {
    fn name(&self) -> &'static str {
        if cfg!(target_os = "linux") {
            "inotify"
        } else if cfg!(target_os = "macos") {
            "fs-events"
        } else if cfg!(windows) {
            "windows"
        } else {
            "notify"
        }
    }

    async fn subscribe(
        &self,
        root: &Path,
        excludes: &[String],
        sink: BackendSink,
    ) -> Result<Box<dyn BackendHandle>, BackendError> {
        let excludes = PatternSet::new(root, excludes)
            .map_err(|e| BackendError::Other(format!("{:#}", e)))?;
        let root = root.to_path_buf();

        // Recursive registration walks the whole tree on some platforms
        let watcher = tokio::task::spawn_blocking({
            let root = root.clone();
            move || -> Result<RecommendedWatcher, BackendError> {
                let mut watcher = RecommendedWatcher::new(
                    move |result: notify::Result<Event>| match result {
                        Ok(event) => {
                            if event.need_rescan() {
                                sink.error(BackendError::RescanRequired(format!(
                                    "{:?}",
                                    event.paths
                                )));
                            }
                            let events = map_event(event, &excludes);
                            sink.events(events);
                        }
                        Err(error) => sink.error(error.into()),
                    },
                    Config::default(),
                )?;
                watcher.watch(&root, RecursiveMode::Recursive)?;
                Ok(watcher)
            }
        })
        .await
        .map_err(|e| BackendError::Other(format!("Watch task failed: {}", e)))??;

        Ok(Box::new(NotifyHandle {
            root,
            watcher: Some(watcher),
        }))
    }
}

/// Live `notify` subscription
struct NotifyHandle {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

#[async_trait]
impl BackendHandle for NotifyHandle {
    async fn unsubscribe(mut self: Box<Self>) -> Result<(), BackendError> {
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || {
            // The root may already be gone; dropping the watcher releases it anyway
            if let Err(e) = watcher.unwatch(&root) {
                debug!("unwatch {} failed: {}", root.display(), e);
            }
            drop(watcher);
        })
        .await
        .map_err(|e| BackendError::Other(format!("Unwatch task failed: {}", e)))
    }
}

/// Translate a `notify` event into raw events, dropping excluded paths
fn map_event(event: Event, excludes: &PatternSet) -> Vec<RawEvent> {
    let mut events = Vec::with_capacity(event.paths.len());
    let mut push = |event: RawEvent| {
        if !excludes.matches(&event.path) {
            events.push(event);
        }
    };

    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().for_each(|p| push(RawEvent::created(p))),
        EventKind::Remove(_) => event.paths.into_iter().for_each(|p| push(RawEvent::deleted(p))),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().for_each(|p| push(RawEvent::deleted(p)))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().for_each(|p| push(RawEvent::created(p)))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            if let Some(from) = paths.next() {
                push(RawEvent::deleted(from));
            }
            paths.for_each(|p| push(RawEvent::created(p)));
        }
        // Rename without a direction: look at the disk
        EventKind::Modify(ModifyKind::Name(_)) => event.paths.into_iter().for_each(|p| {
            if p.exists() {
                push(RawEvent::created(p))
            } else {
                push(RawEvent::deleted(p))
            }
        }),
        EventKind::Modify(_) => event.paths.into_iter().for_each(|p| push(RawEvent::updated(p))),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    events
}
