//! Event coalescing
//!
//! Merges the events of one batch so every path reports at most one net
//! change:
//! - Added then Deleted cancels out
//! - Deleted then Added becomes Updated
//! - Added then Updated stays Added
//! - anything else takes the newer kind
//!
//! Deletes of paths below another deleted path in the same batch are
//! dropped, only the top-most delete of a removed subtree is kept.

use std::collections::HashMap;
use tw_core::path::{is_parent, path_key, IGNORE_CASE};
use tw_core::{FileChangeEvent, FileChangeKind};

/// Accumulates events of one batch
#[derive(Debug, Default)]
pub struct EventCoalescer {
    /// Events in arrival order; `None` marks an event cancelled out later
    coalesced: Vec<Option<FileChangeEvent>>,
    /// Path key to index of its event in `coalesced`
    by_path: HashMap<String, usize>,
}

impl EventCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, event: FileChangeEvent) {
        let key = path_key(&event.resource);

        let existing_index = self
            .by_path
            .get(&key)
            .copied()
            .filter(|&index| self.coalesced[index].is_some());

        let Some(index) = existing_index else {
            self.keep(key, event);
            return;
        };

        let Some(existing) = self.coalesced[index].as_mut() else {
            return;
        };

        // Rename to a different case on a case-insensitive file system
        if existing.resource != event.resource
            && matches!(event.kind, FileChangeKind::Added | FileChangeKind::Deleted)
        {
            self.keep(key, event);
            return;
        }

        match (existing.kind, event.kind) {
            (FileChangeKind::Added, FileChangeKind::Deleted) => {
                self.coalesced[index] = None;
                self.by_path.remove(&key);
            }
            (FileChangeKind::Deleted, FileChangeKind::Added) => {
                existing.kind = FileChangeKind::Updated;
            }
            (FileChangeKind::Added, FileChangeKind::Updated) => {}
            (_, kind) => existing.kind = kind,
        }
    }

    fn keep(&mut self, key: String, event: FileChangeEvent) {
        self.by_path.insert(key, self.coalesced.len());
        self.coalesced.push(Some(event));
    }

    /// Net events of the batch: deletes first (shortest path first), then
    /// additions and updates in arrival order
    pub fn coalesce(self) -> Vec<FileChangeEvent> {
        let (mut deletes, others): (Vec<_>, Vec<_>) = self
            .coalesced
            .into_iter()
            .flatten()
            .partition(|event| event.kind == FileChangeKind::Deleted);

        deletes.sort_by_key(|event| event.resource.as_os_str().len());

        let mut kept_deletes: Vec<FileChangeEvent> = Vec::with_capacity(deletes.len());
        for event in deletes {
            if kept_deletes
                .iter()
                .any(|deleted| is_parent(&event.resource, &deleted.resource, IGNORE_CASE))
            {
                continue;
            }
            kept_deletes.push(event);
        }

        kept_deletes.extend(others);
        kept_deletes
    }
}

/// Coalesce one batch of events
pub fn coalesce_events(events: Vec<FileChangeEvent>) -> Vec<FileChangeEvent> {
    let mut coalescer = EventCoalescer::new();
    for event in events {
        coalescer.process(event);
    }
    coalescer.coalesce()
}
