//! A call index loaded from a JSON manifest
//!
//! The manifest lists every function with its location and the qualified
//! names it calls. Calls to names outside the manifest (library code) are
//! dropped at load time.

use crate::index::{CallIndex, IndexError, Scope};
use callscope_core::FunctionRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// One function as described by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    pub qualified_name: String,
    pub file: PathBuf,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub test: bool,
    /// Qualified names of called functions.
    #[serde(default)]
    pub calls: Vec<String>,
}

impl FunctionEntry {
    fn function_ref(&self) -> FunctionRef {
        let function = FunctionRef::new(&self.qualified_name, &self.name, &self.file);
        match self.line {
            Some(line) => function.with_line(line),
            None => function,
        }
    }

    /// Explicitly marked, or living under a `tests` directory.
    fn is_test(&self) -> bool {
        self.test
            || self
                .file
                .components()
                .any(|c| matches!(c, Component::Normal(name) if name == "tests"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub functions: Vec<FunctionEntry>,
}

struct Indexed {
    function: FunctionRef,
    module: String,
    test: bool,
}

/// In-memory call index over a manifest.
pub struct StaticIndex {
    root: PathBuf,
    by_name: BTreeMap<String, Indexed>,
    callees: BTreeMap<String, BTreeSet<String>>,
    callers: BTreeMap<String, BTreeSet<String>>,
}

impl StaticIndex {
    /// Index `manifest`. Relative function files are resolved against `root`.
    pub fn from_manifest(manifest: Manifest, root: impl Into<PathBuf>) -> Self {
        let mut by_name = BTreeMap::new();
        for entry in &manifest.functions {
            by_name.insert(
                entry.qualified_name.clone(),
                Indexed {
                    function: entry.function_ref(),
                    module: entry.module.clone(),
                    test: entry.is_test(),
                },
            );
        }

        let mut callees: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut callers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut external = 0usize;
        for entry in &manifest.functions {
            for call in &entry.calls {
                if !by_name.contains_key(call) {
                    external += 1;
                    continue;
                }
                callees.entry(entry.qualified_name.clone()).or_default().insert(call.clone());
                callers.entry(call.clone()).or_default().insert(entry.qualified_name.clone());
            }
        }
        debug!("Dropped {} calls to functions outside the index", external);

        StaticIndex {
            root: root.into(),
            by_name,
            callees,
            callers,
        }
    }

    pub fn from_json_str(json: &str, root: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let manifest: Manifest = serde_json::from_str(json)?;
        Ok(Self::from_manifest(manifest, root))
    }

    /// Load a manifest file. The project root is the manifest's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let index = Self::from_json_str(&json, root)?;
        info!("Loaded {} functions from {}", index.len(), path.display());
        Ok(index)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of indexed functions.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// All indexed functions, ordered by qualified name.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionRef> {
        self.by_name.values().map(|indexed| &indexed.function)
    }

    /// Find a function by qualified name, or by short name when that is unambiguous.
    pub fn lookup(&self, name: &str) -> Result<FunctionRef, IndexError> {
        if let Some(indexed) = self.by_name.get(name) {
            return Ok(indexed.function.clone());
        }
        let mut matches = self.functions().filter(|function| function.name == name);
        match (matches.next(), matches.next()) {
            (Some(function), None) => Ok(function.clone()),
            _ => Err(IndexError::UnknownFunction(name.to_string())),
        }
    }

    fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    fn neighbors(
        &self,
        function: &FunctionRef,
        table: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<BTreeSet<FunctionRef>, IndexError> {
        if !self.by_name.contains_key(&function.qualified_name) {
            return Err(IndexError::UnknownFunction(function.qualified_name.clone()));
        }
        Ok(table
            .get(&function.qualified_name)
            .into_iter()
            .flatten()
            .filter_map(|name| self.by_name.get(name))
            .map(|indexed| indexed.function.clone())
            .collect())
    }
}

impl CallIndex<FunctionRef> for StaticIndex {
    fn all_functions(&self, scope: &Scope) -> Result<BTreeSet<FunctionRef>, IndexError> {
        let in_scope: BTreeSet<FunctionRef> = match scope {
            Scope::Project { include_tests } => self
                .by_name
                .values()
                .filter(|indexed| *include_tests || !indexed.test)
                .map(|indexed| indexed.function.clone())
                .collect(),
            Scope::Module(module) => {
                let functions: BTreeSet<FunctionRef> = self
                    .by_name
                    .values()
                    .filter(|indexed| &indexed.module == module)
                    .map(|indexed| indexed.function.clone())
                    .collect();
                if functions.is_empty() {
                    return Err(IndexError::ModuleNotFound(module.clone()));
                }
                functions
            }
            Scope::Directory(dir) => {
                let dir = self.relative(dir);
                let functions: BTreeSet<FunctionRef> = self
                    .by_name
                    .values()
                    .filter(|indexed| self.relative(&indexed.function.file_path).starts_with(dir))
                    .map(|indexed| indexed.function.clone())
                    .collect();
                if functions.is_empty() && !self.root.join(dir).is_dir() {
                    return Err(IndexError::DirectoryNotFound(dir.to_path_buf()));
                }
                functions
            }
        };
        debug!("{} holds {} functions", scope, in_scope.len());
        Ok(in_scope)
    }

    fn find_callers(&self, function: &FunctionRef) -> Result<BTreeSet<FunctionRef>, IndexError> {
        self.neighbors(function, &self.callers)
    }

    fn find_callees(&self, function: &FunctionRef) -> Result<BTreeSet<FunctionRef>, IndexError> {
        self.neighbors(function, &self.callees)
    }
}
