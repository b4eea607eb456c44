//! # Forge Watcher
//!
//! Polling file watcher producing debounced CREATE/MODIFY/DELETE events.
//!
//! The watcher is intentionally polling-based: it needs no native filesystem
//! notification API and behaves identically on every platform. Each watch
//! rescans its root once per poll interval, diffs mtimes against the previous
//! scan, and enqueues debounced [`FileEvent`]s that consumers drain with
//! [`FileWatcher::get_events`].

mod error;
mod watcher;

pub use error::{Result, WatcherError};
pub use watcher::{FileEvent, FileEventType, FileWatcher, WatchConfig, WatchInfo};
