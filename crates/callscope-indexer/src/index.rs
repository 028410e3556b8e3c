//! The symbol index consumed as an oracle

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which part of the code base a scope build covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The whole program, optionally including test code.
    Project { include_tests: bool },
    /// A single module by name.
    Module(String),
    /// A directory subtree.
    Directory(PathBuf),
}

impl Scope {
    pub fn whole_project() -> Self {
        Scope::Project { include_tests: true }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project { include_tests: true } => write!(f, "project (with tests)"),
            Scope::Project { include_tests: false } => write!(f, "project (without tests)"),
            Scope::Module(name) => write!(f, "module {}", name),
            Scope::Directory(path) => write!(f, "directory {}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("function is not in the index: {0}")]
    UnknownFunction(String),

    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read index manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed index manifest: {0}")]
    Json(#[from] serde_json::Error),
}

impl IndexError {
    /// The selected scope no longer exists. Recoverable as an empty scope.
    pub fn is_scope_error(&self) -> bool {
        matches!(self, IndexError::ModuleNotFound(_) | IndexError::DirectoryNotFound(_))
    }
}

/// Symbol resolution provided by an external index.
///
/// Caller searches are always project-wide; scope-limited builds filter the
/// result themselves so cached caller sets stay valid across scope changes.
pub trait CallIndex<F>: Send + Sync {
    /// Every function declared in `scope`.
    fn all_functions(&self, scope: &Scope) -> Result<BTreeSet<F>, IndexError>;

    /// Functions containing a call to `function`.
    fn find_callers(&self, function: &F) -> Result<BTreeSet<F>, IndexError>;

    /// Functions called from the body of `function`.
    fn find_callees(&self, function: &F) -> Result<BTreeSet<F>, IndexError>;
}
