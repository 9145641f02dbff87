//! Watcher instances
//!
//! One [`WatcherInstance`] serves one deduplicated request. It is owned by
//! the service task and never shared, so none of its state needs locking.

use crate::backend::BackendHandle;
use crate::debounce::BatchWorker;
use crate::normalize::NormalizedPath;
use crate::polling::PollingHandle;
use crate::service::InstanceId;
use crate::supervisor::FailureReason;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tw_core::path::{is_equal_or_parent, path_key, IGNORE_CASE};
use tw_core::{FileChangeEvent, PatternSet, WatchRequest};

/// Delivered to direct path subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEvent {
    /// The subscribed path changed
    Changed(FileChangeEvent),
    /// The owning watcher failed or stopped; nothing follows
    Stopped,
}

/// Callback of a direct path subscription
pub type PathCallback = Box<dyn FnMut(PathEvent) + Send>;

/// Native resource held by a running watcher
pub(crate) enum WatchResource {
    /// Subscription not completed yet
    Pending,
    Backend(Box<dyn BackendHandle>),
    Polling(PollingHandle),
    /// Released after stop or failure
    Released,
}

impl fmt::Debug for WatchResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchResource::Pending => "Pending",
            WatchResource::Backend(_) => "Backend",
            WatchResource::Polling(_) => "Polling",
            WatchResource::Released => "Released",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Active,
    Failed(FailureReason),
    Stopped,
}

/// Snapshot of one watcher for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherStatus {
    pub request: WatchRequest,
    pub restarts: u32,
    /// Backend subscribed or first polling snapshot written
    pub ready: bool,
    /// Set once the watcher failed permanently
    pub failed: Option<FailureReason>,
}

struct Subscriber {
    id: u64,
    callback: PathCallback,
}

/// State of one running watcher
pub struct WatcherInstance {
    pub(crate) id: InstanceId,
    pub(crate) request: WatchRequest,
    pub(crate) restarts: u32,
    pub(crate) token: CancellationToken,
    pub(crate) resource: WatchResource,
    pub(crate) normalized: NormalizedPath,
    pub(crate) worker: BatchWorker<FileChangeEvent>,
    pub(crate) ready: bool,
    pub(crate) state: InstanceState,
    /// A restart timer is pending
    pub(crate) restart_scheduled: bool,
    includes: Option<PatternSet>,
    excludes: Option<PatternSet>,
    /// Direct subscribers by path key
    subscriptions: HashMap<String, Vec<Subscriber>>,
}

impl fmt::Debug for WatcherInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherInstance")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("restarts", &self.restarts)
            .field("resource", &self.resource)
            .field("state", &self.state)
            .field("subscriptions", &self.subscriptions_count())
            .finish()
    }
}

impl WatcherInstance {
    pub(crate) fn new(
        id: InstanceId,
        request: WatchRequest,
        restarts: u32,
        coalesce_delay: Duration,
        token: CancellationToken,
    ) -> Self {
        let normalized = NormalizedPath::unchanged(&request.path);
        Self {
            id,
            request,
            restarts,
            token,
            resource: WatchResource::Pending,
            normalized,
            worker: BatchWorker::new(coalesce_delay),
            ready: false,
            state: InstanceState::Active,
            restart_scheduled: false,
            includes: None,
            excludes: None,
            subscriptions: HashMap::new(),
        }
    }

    /// Compile the request's include and exclude patterns
    ///
    /// Relative patterns apply to the requested path, the form every event
    /// path is rewritten to before it is matched.
    pub(crate) fn compile_patterns(&mut self) -> anyhow::Result<()> {
        self.excludes = if self.request.excludes.is_empty() {
            None
        } else {
            Some(PatternSet::new(&self.request.path, &self.request.excludes)?)
        };
        self.includes = match &self.request.includes {
            Some(includes) if !includes.is_empty() => {
                Some(PatternSet::new(&self.request.path, includes)?)
            }
            _ => None,
        };
        Ok(())
    }

    pub fn request(&self) -> &WatchRequest {
        &self.request
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, InstanceState::Failed(_))
    }

    /// Whether events for this instance may still be processed
    pub(crate) fn is_live(&self) -> bool {
        self.state == InstanceState::Active && !self.token.is_cancelled()
    }

    /// Whether `path` passes the include patterns
    ///
    /// Without includes every path below the root is included.
    pub fn include(&self, path: &Path) -> bool {
        if !is_equal_or_parent(path, &self.request.path, IGNORE_CASE) {
            return false;
        }
        match &self.includes {
            Some(includes) => includes.matches(path),
            None => true,
        }
    }

    /// Whether `path` is excluded by the request
    pub fn exclude(&self, path: &Path) -> bool {
        match &self.excludes {
            Some(excludes) => excludes.matches(path),
            None => false,
        }
    }

    /// Register a direct subscriber for `path`
    pub(crate) fn subscribe(&mut self, id: u64, path: &Path, callback: PathCallback) {
        self.subscriptions
            .entry(path_key(path))
            .or_default()
            .push(Subscriber { id, callback });
    }

    /// Remove a direct subscriber; true if it was registered here
    pub(crate) fn unsubscribe(&mut self, id: u64) -> bool {
        let mut removed = false;
        self.subscriptions.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|subscriber| subscriber.id != id);
            removed |= subscribers.len() != before;
            !subscribers.is_empty()
        });
        removed
    }

    pub fn subscriptions_count(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }

    /// Deliver an event to the subscribers of its exact path
    pub(crate) fn notify_file_change(&mut self, event: &FileChangeEvent) {
        if let Some(subscribers) = self.subscriptions.get_mut(&path_key(&event.resource)) {
            for subscriber in subscribers {
                (subscriber.callback)(PathEvent::Changed(event.clone()));
            }
        }
    }

    /// Tell every subscriber the watcher is gone and forget them
    pub(crate) fn notify_stopped(&mut self) {
        let subscriptions = std::mem::take(&mut self.subscriptions);
        if !subscriptions.is_empty() {
            debug!(
                path = %self.request.path.display(),
                subscribers = subscriptions.values().map(Vec::len).sum::<usize>(),
                "Notifying path subscribers of stopped watcher"
            );
        }
        for subscriber in subscriptions.into_values().flatten() {
            let mut callback = subscriber.callback;
            callback(PathEvent::Stopped);
        }
    }

    pub(crate) fn status(&self) -> WatcherStatus {
        WatcherStatus {
            request: self.request.clone(),
            restarts: self.restarts,
            ready: self.ready,
            failed: match self.state {
                InstanceState::Failed(reason) => Some(reason),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tw_core::FileChangeKind;

    fn instance(request: WatchRequest) -> WatcherInstance {
        let mut instance = WatcherInstance::new(
            InstanceId(1),
            request,
            0,
            Duration::from_millis(75),
            CancellationToken::new(),
        );
        instance.compile_patterns().unwrap();
        instance
    }

    fn recorder() -> (PathCallback, Arc<Mutex<Vec<PathEvent>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        (Box::new(move |event| sink.lock().push(event)), received)
    }

    #[test]
    fn test_include_and_exclude() {
        let instance = instance(
            WatchRequest::new("/ws")
                .with_includes(["*.rs"])
                .with_excludes(["target/"]),
        );

        assert!(instance.include(Path::new("/ws/src/main.rs")));
        assert!(!instance.include(Path::new("/ws/readme.md")));
        assert!(!instance.include(Path::new("/other/main.rs")));

        assert!(instance.exclude(Path::new("/ws/target/debug")));
        assert!(!instance.exclude(Path::new("/ws/src")));
    }

    #[test]
    fn test_no_includes_covers_subtree() {
        let instance = instance(WatchRequest::new("/ws"));
        assert!(instance.include(Path::new("/ws/anything")));
        assert!(instance.include(Path::new("/ws")));
        assert!(!instance.exclude(Path::new("/ws/anything")));
    }

    #[test]
    fn test_subscribers_notified_by_exact_path() {
        let mut instance = instance(WatchRequest::new("/ws"));
        let (callback, received) = recorder();
        instance.subscribe(7, Path::new("/ws/a.txt"), callback);

        instance.notify_file_change(&FileChangeEvent::new(FileChangeKind::Updated, "/ws/b.txt", None));
        assert!(received.lock().is_empty());

        let event = FileChangeEvent::new(FileChangeKind::Updated, "/ws/a.txt", None);
        instance.notify_file_change(&event);
        assert_eq!(*received.lock(), vec![PathEvent::Changed(event)]);
    }

    #[test]
    fn test_stop_notified_once() {
        let mut instance = instance(WatchRequest::new("/ws"));
        let (callback, received) = recorder();
        instance.subscribe(7, Path::new("/ws/a.txt"), callback);

        instance.notify_stopped();
        instance.notify_stopped();

        assert_eq!(*received.lock(), vec![PathEvent::Stopped]);
        assert_eq!(instance.subscriptions_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let mut instance = instance(WatchRequest::new("/ws"));
        let (first, _) = recorder();
        let (second, received) = recorder();
        instance.subscribe(1, Path::new("/ws/a.txt"), first);
        instance.subscribe(2, Path::new("/ws/a.txt"), second);

        assert!(instance.unsubscribe(1));
        assert!(!instance.unsubscribe(1));
        assert_eq!(instance.subscriptions_count(), 1);

        instance.notify_stopped();
        assert_eq!(*received.lock(), vec![PathEvent::Stopped]);
    }
}
