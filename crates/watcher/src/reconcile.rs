//! Reconciliation of running watchers against a new request set
//!
//! Computes the minimal set of watchers to stop and requests to start.
//! A running watcher is kept when an incoming request has the same key, the
//! same root and an equal watch configuration (pattern sets compared
//! irrespective of order). Failed watchers are never kept, so a caller can
//! reissue a request after the root was recreated.

use std::collections::HashMap;
use tw_core::path::{is_equal, IGNORE_CASE};
use tw_core::{WatchRequest, WatcherKey};

/// A running watcher as seen by the planner
#[derive(Debug, Clone, Copy)]
pub struct ActiveWatcher<'a> {
    pub request: &'a WatchRequest,
    pub failed: bool,
}

/// Operations that bring the running set in line with the requests
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Keys of watchers to stop
    pub to_stop: Vec<WatcherKey>,
    /// Requests to start a watcher for
    pub to_start: Vec<WatchRequest>,
    /// Kept watchers whose request changed in a way that needs no restart
    pub to_update: Vec<WatchRequest>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_stop.is_empty() && self.to_start.is_empty()
    }
}

/// What a `watch` call did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Watchers started
    pub started: usize,
    /// Running watchers stopped; replaced failed watchers are not counted
    pub stopped: usize,
    /// Requests dropped during deduplication and reported as failed
    pub unwatchable: usize,
}

/// Plan the stop/start operations for `incoming`
///
/// `incoming` must already be deduplicated, so keys are unique.
pub fn plan_reconcile<'a>(
    active: impl IntoIterator<Item = (&'a WatcherKey, ActiveWatcher<'a>)>,
    incoming: Vec<WatchRequest>,
) -> ReconcilePlan {
    let mut to_stop: HashMap<&WatcherKey, ActiveWatcher<'_>> = active.into_iter().collect();
    let mut plan = ReconcilePlan::default();

    for request in incoming {
        let key = request.key();
        let keep = to_stop.get(&key).is_some_and(|watcher| {
            !watcher.failed
                && is_equal(&watcher.request.path, &request.path, IGNORE_CASE)
                && watcher.request.same_watch_config(&request)
        });

        if keep {
            if let Some(watcher) = to_stop.remove(&key) {
                if *watcher.request != request {
                    plan.to_update.push(request);
                }
            }
        } else {
            plan.to_start.push(request);
        }
    }

    let mut to_stop: Vec<WatcherKey> = to_stop.into_keys().cloned().collect();
    to_stop.sort();
    plan.to_stop = to_stop;
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tw_core::ChangeFilter;

    fn plan(active: &[(WatchRequest, bool)], incoming: Vec<WatchRequest>) -> ReconcilePlan {
        let keys: Vec<WatcherKey> = active.iter().map(|(request, _)| request.key()).collect();
        plan_reconcile(
            keys.iter().zip(active.iter()).map(|(key, (request, failed))| {
                (
                    key,
                    ActiveWatcher {
                        request,
                        failed: *failed,
                    },
                )
            }),
            incoming,
        )
    }

    #[test]
    fn test_value_equal_requests_are_noop() {
        let active = vec![
            (WatchRequest::new("/ws").with_excludes(["a", "b"]), false),
            (WatchRequest::new("/other").with_correlation(3), false),
        ];
        let incoming = vec![
            WatchRequest::new("/other").with_correlation(3),
            WatchRequest::new("/ws").with_excludes(["b", "a"]),
        ];

        let plan = plan(&active, incoming);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_changed_config_restarts() {
        let active = vec![(WatchRequest::new("/ws"), false)];
        let incoming = vec![WatchRequest::new("/ws").with_polling_interval(Duration::from_secs(1))];

        let plan = plan(&active, incoming.clone());
        assert_eq!(plan.to_stop, vec![WatchRequest::new("/ws").key()]);
        assert_eq!(plan.to_start, incoming);
    }

    #[test]
    fn test_removed_request_stops() {
        let active = vec![(WatchRequest::new("/a"), false), (WatchRequest::new("/b"), false)];

        let plan = plan(&active, vec![WatchRequest::new("/a")]);
        assert_eq!(plan.to_stop, vec![WatchRequest::new("/b").key()]);
        assert!(plan.to_start.is_empty());
    }

    #[test]
    fn test_failed_watcher_restarted() {
        let active = vec![(WatchRequest::new("/ws"), true)];

        let plan = plan(&active, vec![WatchRequest::new("/ws")]);
        assert_eq!(plan.to_stop.len(), 1);
        assert_eq!(plan.to_start.len(), 1);
    }

    #[test]
    fn test_correlated_path_change_restarts() {
        let active = vec![(WatchRequest::new("/a").with_correlation(1), false)];

        let plan = plan(&active, vec![WatchRequest::new("/b").with_correlation(1)]);
        assert_eq!(plan.to_stop, vec![WatcherKey::Correlation(1)]);
        assert_eq!(plan.to_start.len(), 1);
    }

    #[test]
    fn test_filter_change_updates_in_place() {
        let active = vec![(WatchRequest::new("/ws").with_correlation(1), false)];
        let changed = WatchRequest::new("/ws").with_correlation(1).with_filter(ChangeFilter {
            ignore_updated: true,
            ..Default::default()
        });

        let plan = plan(&active, vec![changed.clone()]);
        assert!(plan.is_empty());
        assert_eq!(plan.to_update, vec![changed]);
    }
}
