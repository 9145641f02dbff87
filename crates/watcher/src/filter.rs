//! Post-coalescing event filter
//!
//! Include and exclude patterns are already applied when events enter a
//! watcher. This stage feeds direct path subscribers, detects the deletion
//! of the watch root and applies the per-kind filter of correlated requests.

use crate::instance::WatcherInstance;
use tracing::trace;
use tw_core::path::{is_equal, IGNORE_CASE};
use tw_core::{FileChangeEvent, FileChangeKind};

/// Events that survived filtering
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    pub events: Vec<FileChangeEvent>,
    /// The watch root itself was deleted in this batch
    pub root_deleted: bool,
}

/// Filter one coalesced batch of a watcher
pub fn filter_events(
    events: Vec<FileChangeEvent>,
    instance: &mut WatcherInstance,
    verbose: bool,
) -> FilterOutcome {
    // Shared watchers must not apply one caller's filter to another's events
    let filter = if instance.request.is_correlated() {
        instance.request.filter
    } else {
        None
    };

    let mut outcome = FilterOutcome::default();
    for event in events {
        // Direct subscribers see every event of their path
        if instance.subscriptions_count() > 0 {
            instance.notify_file_change(&event);
        }

        if event.kind == FileChangeKind::Deleted
            && is_equal(&event.resource, &instance.request.path, IGNORE_CASE)
        {
            outcome.root_deleted = true;
        }

        if filter.is_some_and(|filter| filter.is_filtered(event.kind)) {
            if verbose {
                trace!(
                    path = %instance.request.path.display(),
                    correlation = ?instance.request.correlation_id,
                    " >> ignored (filtered) {}",
                    event.resource.display()
                );
            }
            continue;
        }

        if verbose {
            trace!(
                path = %instance.request.path.display(),
                correlation = ?instance.request.correlation_id,
                " >> normalized {}",
                event
            );
        }
        outcome.events.push(event);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::PathEvent;
    use crate::service::InstanceId;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tw_core::{ChangeFilter, WatchRequest};

    fn instance(request: WatchRequest) -> WatcherInstance {
        WatcherInstance::new(
            InstanceId(1),
            request,
            0,
            Duration::from_millis(75),
            CancellationToken::new(),
        )
    }

    fn event(kind: FileChangeKind, path: &str) -> FileChangeEvent {
        FileChangeEvent::new(kind, path, None)
    }

    const IGNORE_UPDATES: ChangeFilter = ChangeFilter {
        ignore_added: false,
        ignore_updated: true,
        ignore_deleted: false,
    };

    #[test]
    fn test_filter_applies_to_correlated_requests() {
        let mut instance = instance(WatchRequest::new("/ws").with_correlation(1).with_filter(IGNORE_UPDATES));

        let outcome = filter_events(
            vec![
                event(FileChangeKind::Updated, "/ws/a"),
                event(FileChangeKind::Added, "/ws/b"),
            ],
            &mut instance,
            false,
        );

        assert_eq!(outcome.events, vec![event(FileChangeKind::Added, "/ws/b")]);
        assert!(!outcome.root_deleted);
    }

    #[test]
    fn test_filter_ignored_for_shared_watchers() {
        let mut instance = instance(WatchRequest::new("/ws").with_filter(IGNORE_UPDATES));

        let outcome = filter_events(vec![event(FileChangeKind::Updated, "/ws/a")], &mut instance, false);
        assert_eq!(outcome.events.len(), 1);
    }

    #[test]
    fn test_root_deletion_detected() {
        let mut instance = instance(WatchRequest::new("/ws"));

        let outcome = filter_events(
            vec![
                event(FileChangeKind::Deleted, "/ws"),
                event(FileChangeKind::Added, "/ws/late"),
            ],
            &mut instance,
            false,
        );
        assert!(outcome.root_deleted);
        assert_eq!(outcome.events.len(), 2);
    }

    #[test]
    fn test_subscribers_see_filtered_events() {
        let mut instance = instance(WatchRequest::new("/ws").with_correlation(1).with_filter(IGNORE_UPDATES));
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        instance.subscribe(1, Path::new("/ws/a"), Box::new(move |e| sink.lock().push(e)));

        let updated = event(FileChangeKind::Updated, "/ws/a");
        let outcome = filter_events(vec![updated.clone()], &mut instance, false);

        assert!(outcome.events.is_empty());
        assert_eq!(*received.lock(), vec![PathEvent::Changed(updated)]);
    }
}
