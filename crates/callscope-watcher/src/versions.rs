//! Concurrent table of per-file modification versions

use callscope_core::VersionSource;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-file edit counters plus a global generation counter.
///
/// Files never seen are at version 0. Paths under `root` are stored relative
/// to it, so absolute paths from filesystem events and relative paths from an
/// index manifest address the same entry.
#[derive(Debug, Default)]
pub struct FileVersions {
    root: Option<PathBuf>,
    versions: DashMap<PathBuf, u64>,
    generation: AtomicU64,
}

impl FileVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Versions for a project rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        FileVersions {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    fn key(&self, file: &Path) -> PathBuf {
        match &self.root {
            Some(root) => file.strip_prefix(root).unwrap_or(file).to_path_buf(),
            None => file.to_path_buf(),
        }
    }

    /// Record an edit of `file`. Returns its new version.
    pub fn bump(&self, file: &Path) -> u64 {
        let key = self.key(file);
        let version = {
            let mut entry = self.versions.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("{} is now at version {}", file.display(), version);
        version
    }

    /// Number of files edited at least once.
    pub fn tracked_files(&self) -> usize {
        self.versions.len()
    }
}

impl VersionSource for FileVersions {
    fn modification_version(&self, file: &Path) -> u64 {
        self.versions
            .get(&self.key(file))
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
