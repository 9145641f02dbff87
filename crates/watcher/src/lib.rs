//! Recursive file system watching for Treewatch
//!
//! This crate turns watch requests into a stream of coalesced change events:
//! - Request deduplication over a path trie (symbolic links watched on their own)
//! - Symlink and casing normalization of watch roots
//! - Per-watcher event coalescing with a fixed delay
//! - Throttled delivery with a hard bound on buffered events
//! - Restart supervision after backend errors
//! - Snapshot polling when no native backend is available
//!
//! ```no_run
//! # async fn demo() -> Result<(), watcher::WatcherError> {
//! use watcher::{Watcher, WatcherConfig};
//! use tw_core::WatchRequest;
//!
//! let (watcher, mut streams) = Watcher::with_native_backend(WatcherConfig::default())?;
//! watcher.watch(vec![WatchRequest::new("/ws").with_excludes(["**/target/**"])]).await?;
//!
//! while let Some(events) = streams.events.recv().await {
//!     for event in events {
//!         println!("{}", event);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod coalesce;
pub mod config;
pub mod debounce;
pub mod dedupe;
pub mod error;
pub mod filter;
pub mod instance;
pub mod normalize;
pub mod platform;
pub mod polling;
pub mod reconcile;
pub mod service;
pub mod supervisor;
pub mod throttle;
pub mod trie;

pub use backend::{BackendHandle, BackendSink, MemoryBackend, NotifyBackend, WatchBackend};
pub use config::{ThrottleConfig, WatcherConfig};
pub use error::{BackendError, WatcherError};
pub use instance::{InstanceState, PathEvent, WatcherStatus};
pub use reconcile::ReconcileReport;
pub use service::{PathSubscription, Watcher, WatcherStreams};
pub use supervisor::FailureReason;
