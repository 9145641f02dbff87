//! Native change-notification backends
//!
//! The watcher service only depends on the [`WatchBackend`] capability:
//! subscribe a root with a set of excludes and get raw events and errors
//! delivered through a [`BackendSink`] until the returned handle is
//! unsubscribed.

pub mod memory;
pub mod native;

use crate::error::BackendError;
use crate::service::{InstanceId, Signal};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;
use tw_core::RawEvent;

pub use self::memory::MemoryBackend;
pub use self::native::NotifyBackend;

/// A native change-notification capability
#[async_trait]
pub trait WatchBackend: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Start watching `root` recursively
    ///
    /// Paths matching `excludes` must not be reported.
    async fn subscribe(
        &self,
        root: &Path,
        excludes: &[String],
        sink: BackendSink,
    ) -> Result<Box<dyn BackendHandle>, BackendError>;
}

/// A live backend subscription
#[async_trait]
pub trait BackendHandle: Send {
    /// Release the native resources of the subscription
    async fn unsubscribe(self: Box<Self>) -> Result<(), BackendError>;
}

/// Where a backend delivers events and errors for one watcher
///
/// Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct BackendSink {
    instance: InstanceId,
    tx: mpsc::UnboundedSender<Signal>,
}

impl BackendSink {
    pub(crate) fn new(instance: InstanceId, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { instance, tx }
    }

    /// Deliver a batch of raw events
    pub fn events(&self, events: Vec<RawEvent>) {
        if events.is_empty() {
            return;
        }
        // Fails only once the service is gone
        let _ = self.tx.send(Signal::Events {
            instance: self.instance,
            events,
        });
    }

    /// Report an error that happened after the subscription succeeded
    pub fn error(&self, error: BackendError) {
        let _ = self.tx.send(Signal::Error {
            instance: self.instance,
            error,
        });
    }

    /// Signal that the first snapshot of a polling watcher is complete
    pub(crate) fn ready(&self) {
        let _ = self.tx.send(Signal::Ready {
            instance: self.instance,
        });
    }

    /// Whether the service still listens
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
