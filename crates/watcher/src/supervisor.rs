//! Restart supervision
//!
//! Decides what happens to a watcher after its backend reported an error,
//! either while the watcher was running or when it first subscribed.

use crate::error::BackendError;
use std::fmt;
use std::time::Duration;
use tracing::{error, warn};
use tw_core::WatchRequest;

/// Why a watcher ended up failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The backend refused the initial subscription
    SubscribeFailed,
    /// The watch root was deleted
    RootDeleted,
    /// The backend ran out of native watch handles
    ResourceExhausted,
    /// Too many automatic restarts
    RestartsExhausted,
    /// The include or exclude patterns could not be compiled
    InvalidPattern,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FailureReason::SubscribeFailed => "subscription failed",
            FailureReason::RootDeleted => "root deleted",
            FailureReason::ResourceExhausted => "resource exhaustion",
            FailureReason::RestartsExhausted => "too many restarts",
            FailureReason::InvalidPattern => "invalid pattern",
        };
        f.write_str(reason)
    }
}

/// What to do about a backend error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Keep the watcher running as is
    Ignore,
    /// Stop the watcher and report the request as failed
    Fail(FailureReason),
    /// Stop the watcher and subscribe again after `delay`
    Restart { delay: Duration },
}

/// Restart policy shared by all watchers of one service
#[derive(Debug)]
pub struct RestartSupervisor {
    delay: Duration,
    max_restarts: u32,
    /// Resource exhaustion is only logged once until re-armed
    exhaustion_logged: bool,
}

impl RestartSupervisor {
    pub fn new(delay: Duration, max_restarts: u32) -> Self {
        Self {
            delay,
            max_restarts,
            exhaustion_logged: false,
        }
    }

    /// Classify an error reported by the backend of a running watcher
    pub fn on_error(&mut self, err: &BackendError, request: &WatchRequest, restarts: u32) -> Recovery {
        match err {
            BackendError::ResourceExhausted(message) => {
                self.log_exhaustion(message, request);
                Recovery::Fail(FailureReason::ResourceExhausted)
            }
            BackendError::RescanRequired(message) => {
                warn!(
                    path = %request.path.display(),
                    correlation = ?request.correlation_id,
                    "{}",
                    message
                );
                Recovery::Ignore
            }
            BackendError::Unavailable(_) | BackendError::Other(_) => {
                if restarts < self.max_restarts {
                    warn!(
                        path = %request.path.display(),
                        correlation = ?request.correlation_id,
                        "Unexpected error: {} (EUNKNOWN), restarting watcher after {}ms",
                        err,
                        self.delay.as_millis()
                    );
                    Recovery::Restart { delay: self.delay }
                } else {
                    error!(
                        path = %request.path.display(),
                        correlation = ?request.correlation_id,
                        "Unexpected error: {} (EUNKNOWN), gave up after {} restarts",
                        err,
                        restarts
                    );
                    Recovery::Fail(FailureReason::RestartsExhausted)
                }
            }
        }
    }

    /// Classify an error of the initial subscription
    ///
    /// Never restarts: the request is reported and has to be reissued, or
    /// re-armed when the backend ran out of watch handles.
    pub fn on_subscribe_error(&mut self, err: &BackendError, request: &WatchRequest) -> FailureReason {
        match err {
            BackendError::ResourceExhausted(message) => {
                self.log_exhaustion(message, request);
                FailureReason::ResourceExhausted
            }
            _ => {
                error!(
                    path = %request.path.display(),
                    correlation = ?request.correlation_id,
                    "Failed to watch: {}",
                    err
                );
                FailureReason::SubscribeFailed
            }
        }
    }

    fn log_exhaustion(&mut self, message: &str, request: &WatchRequest) {
        if self.exhaustion_logged {
            return;
        }
        self.exhaustion_logged = true;
        error!(
            path = %request.path.display(),
            correlation = ?request.correlation_id,
            "Inotify limit reached (ENOSPC), file changes are no longer reported ({})",
            message
        );
    }

    /// The watch root of a running watcher was deleted
    pub fn on_root_deleted(&self, request: &WatchRequest) -> Recovery {
        warn!(
            path = %request.path.display(),
            correlation = ?request.correlation_id,
            "Watcher shutdown because watched path got deleted"
        );
        Recovery::Fail(FailureReason::RootDeleted)
    }

    /// Allow the exhaustion error to be logged again
    pub fn rearm(&mut self) {
        self.exhaustion_logged = false;
    }

    pub fn exhaustion_logged(&self) -> bool {
        self.exhaustion_logged
    }
}
