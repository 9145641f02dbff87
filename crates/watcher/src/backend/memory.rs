//! In-memory backend
//!
//! Never touches the OS notification APIs: events and errors are injected by
//! the caller. Used to drive the service deterministically in tests and by
//! embedders that produce change notifications themselves.

use super::{BackendHandle, BackendSink, WatchBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tw_core::path::{is_equal, IGNORE_CASE};
use tw_core::{PatternSet, RawEvent};

/// Backend whose events are injected programmatically
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    live: Vec<LiveSubscription>,
    refused: HashMap<PathBuf, BackendError>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
}

#[derive(Debug)]
struct LiveSubscription {
    id: u64,
    root: PathBuf,
    excludes: PatternSet,
    sink: BackendSink,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver events to every live subscription on `root`
    ///
    /// Excluded paths are dropped like a native backend would. Returns false
    /// if nothing is subscribed to `root`.
    pub fn emit(&self, root: &Path, events: Vec<RawEvent>) -> bool {
        let state = self.state.lock();
        let mut delivered = false;
        for subscription in state.live.iter().filter(|s| is_equal(&s.root, root, IGNORE_CASE)) {
            let events: Vec<RawEvent> = events
                .iter()
                .filter(|event| !subscription.excludes.matches(&event.path))
                .cloned()
                .collect();
            subscription.sink.events(events);
            delivered = true;
        }
        delivered
    }

    /// Report an error on every live subscription on `root`
    pub fn emit_error(&self, root: &Path, error: BackendError) -> bool {
        let state = self.state.lock();
        let mut delivered = false;
        for subscription in state.live.iter().filter(|s| is_equal(&s.root, root, IGNORE_CASE)) {
            subscription.sink.error(error.clone());
            delivered = true;
        }
        delivered
    }

    /// Make future subscriptions to `root` fail
    pub fn fail_subscriptions_to(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        let error = BackendError::Other(format!("subscription to {} refused", root.display()));
        self.refuse_subscriptions_to(root, error);
    }

    /// Make future subscriptions to `root` fail with `error`
    pub fn refuse_subscriptions_to(&self, root: impl Into<PathBuf>, error: BackendError) {
        self.state.lock().refused.insert(root.into(), error);
    }

    /// Accept subscriptions to `root` again
    pub fn allow_subscriptions_to(&self, root: &Path) {
        self.state.lock().refused.remove(root);
    }

    /// Roots with a live subscription, in subscription order
    pub fn roots(&self) -> Vec<PathBuf> {
        self.state.lock().live.iter().map(|s| s.root.clone()).collect()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribe_calls
    }
}

#[async_trait]
impl WatchBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(
        &self,
        root: &Path,
        excludes: &[String],
        sink: BackendSink,
    ) -> Result<Box<dyn BackendHandle>, BackendError> {
        let excludes = PatternSet::new(root, excludes)
            .map_err(|e| BackendError::Other(format!("{:#}", e)))?;

        let mut state = self.state.lock();
        state.subscribe_calls += 1;
        if let Some(error) = state.refused.get(root) {
            return Err(error.clone());
        }

        state.next_id += 1;
        let id = state.next_id;
        state.live.push(LiveSubscription {
            id,
            root: root.to_path_buf(),
            excludes,
            sink,
        });

        Ok(Box::new(MemoryHandle {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryHandle {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl BackendHandle for MemoryHandle {
    async fn unsubscribe(self: Box<Self>) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        state.live.retain(|s| s.id != self.id);
        Ok(())
    }
}
