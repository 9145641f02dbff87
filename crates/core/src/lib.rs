//! Core data model for Treewatch
//!
//! Shared by the watcher engine and its callers:
//! - Watch requests and the keys that identify their watchers
//! - Raw backend events and the public change events
//! - Path comparison helpers that respect platform casing rules
//! - Include/exclude pattern sets

pub mod event;
pub mod path;
pub mod pattern;
pub mod request;

pub use event::{FileChangeEvent, FileChangeKind, RawEvent, RawEventKind};
pub use pattern::PatternSet;
pub use request::{patterns_equal, ChangeFilter, WatchRequest, WatcherKey, GLOBSTAR};
