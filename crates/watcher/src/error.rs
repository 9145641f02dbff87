//! Error types for the watcher service and its backends

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Signature of a backend running out of native watch handles
const EXHAUSTION_SIGNATURE: &str = "No space left on device";

/// Signature of a recoverable internal backend re-scan
const RESCAN_SIGNATURE: &str = "File system must be re-scanned";

/// Error reported by a backend, classified for the restart supervisor
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend cannot allocate more native watch handles
    #[error("Inotify limit reached (ENOSPC): {0}")]
    ResourceExhausted(String),

    /// The backend dropped events and re-scanned internally
    #[error("File system must be re-scanned: {0}")]
    RescanRequired(String),

    /// The backend cannot watch at all on this system
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Classify a message from a backend that only reports strings
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(EXHAUSTION_SIGNATURE) {
            BackendError::ResourceExhausted(message)
        } else if message.contains(RESCAN_SIGNATURE) {
            BackendError::RescanRequired(message)
        } else {
            BackendError::Other(message)
        }
    }
}

impl From<notify::Error> for BackendError {
    fn from(error: notify::Error) -> Self {
        match &error.kind {
            notify::ErrorKind::MaxFilesWatch => BackendError::ResourceExhausted(error.to_string()),
            // ENOSPC from inotify_add_watch
            notify::ErrorKind::Io(io) if io.raw_os_error() == Some(28) => {
                BackendError::ResourceExhausted(error.to_string())
            }
            _ => BackendError::from_message(error.to_string()),
        }
    }
}

/// Error returned by the public watcher API
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watcher service is not running")]
    ServiceStopped,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl<T> From<mpsc::error::SendError<T>> for WatcherError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        WatcherError::ServiceStopped
    }
}

impl From<oneshot::error::RecvError> for WatcherError {
    fn from(_: oneshot::error::RecvError) -> Self {
        WatcherError::ServiceStopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_messages() {
        assert!(matches!(
            BackendError::from_message("inotify_add_watch: No space left on device"),
            BackendError::ResourceExhausted(_)
        ));
        assert!(matches!(
            BackendError::from_message("File system must be re-scanned"),
            BackendError::RescanRequired(_)
        ));
        assert!(matches!(
            BackendError::from_message("socket closed"),
            BackendError::Other(_)
        ));
    }

    #[test]
    fn test_notify_max_files_is_exhaustion() {
        let error = notify::Error::new(notify::ErrorKind::MaxFilesWatch);
        assert!(matches!(BackendError::from(error), BackendError::ResourceExhausted(_)));
    }

    #[test]
    fn test_notify_enospc_is_exhaustion() {
        let error = notify::Error::io(std::io::Error::from_raw_os_error(28));
        assert!(matches!(BackendError::from(error), BackendError::ResourceExhausted(_)));
    }
}
