//! Per-file freshness tokens driven by filesystem events

pub mod versions;
pub mod watcher;

pub use versions::FileVersions;
pub use watcher::{VersionWatcher, WatchEvent};
