//! Test utilities for callscope-core

use crate::cache::VersionSource;
use crate::model::FunctionRef;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A function named `name` living in `src/<name>.rs`.
pub fn func(name: &str) -> FunctionRef {
    func_in(name, &format!("src/{}.rs", name))
}

/// A function named `name` living in `file`.
pub fn func_in(name: &str, file: &str) -> FunctionRef {
    FunctionRef::new(format!("crate::{}", name), name, file)
}

/// In-memory version table that tests bump by hand.
#[derive(Default)]
pub struct ManualVersions {
    versions: Mutex<HashMap<PathBuf, u64>>,
    generation: Mutex<u64>,
}

impl ManualVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, file: &str) {
        let mut versions = self.versions.lock().unwrap();
        *versions.entry(PathBuf::from(file)).or_insert(0) += 1;
        *self.generation.lock().unwrap() += 1;
    }
}

impl VersionSource for ManualVersions {
    fn modification_version(&self, file: &Path) -> u64 {
        self.versions.lock().unwrap().get(file).copied().unwrap_or(0)
    }

    fn generation(&self) -> u64 {
        *self.generation.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_bumps_file_and_generation() {
        let versions = ManualVersions::new();
        assert_eq!(versions.modification_version(Path::new("src/a.rs")), 0);

        versions.touch("src/a.rs");
        versions.touch("src/a.rs");
        versions.touch("src/b.rs");

        assert_eq!(versions.modification_version(Path::new("src/a.rs")), 2);
        assert_eq!(versions.modification_version(Path::new("src/b.rs")), 1);
        assert_eq!(versions.generation(), 3);
    }
}
