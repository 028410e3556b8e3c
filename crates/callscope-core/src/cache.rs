//! Session cache of discovered caller → callee dependencies
//!
//! Entries carry the modification version of both endpoint files at discovery
//! time. An entry is only trusted while both versions still match the live
//! values and both endpoints are still in scope; stale entries are dropped by
//! [`DependencyCache::prune`] instead of being recomputed eagerly.

use crate::model::FunctionHandle;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Live freshness tokens for source files.
pub trait VersionSource: Send + Sync {
    /// Monotonically increasing per-file edit counter.
    fn modification_version(&self, file: &Path) -> u64;

    /// Monotonically increasing counter bumped on every edit of any file.
    fn generation(&self) -> u64;
}

/// A discovered call relationship plus the freshness of both endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency<F> {
    pub caller: F,
    pub callee: F,
    pub caller_version: u64,
    pub callee_version: u64,
}

impl<F: FunctionHandle> Dependency<F> {
    fn capture(caller: F, callee: F, versions: &dyn VersionSource) -> Self {
        Dependency {
            caller_version: versions.modification_version(caller.source_file()),
            callee_version: versions.modification_version(callee.source_file()),
            caller,
            callee,
        }
    }

    /// Neither endpoint's file changed since discovery.
    pub fn is_fresh(&self, versions: &dyn VersionSource) -> bool {
        versions.modification_version(self.caller.source_file()) == self.caller_version
            && versions.modification_version(self.callee.source_file()) == self.callee_version
    }
}

/// Which neighbor set of a function has been fully queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coverage {
    Callers,
    Callees,
}

impl Coverage {
    /// Callees only depend on the function's own body; callers can appear in any file.
    fn token<F: FunctionHandle>(self, function: &F, versions: &dyn VersionSource) -> u64 {
        match self {
            Coverage::Callees => versions.modification_version(function.source_file()),
            Coverage::Callers => versions.generation(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub pruned: u64,
}

/// Dependencies discovered during one tool session.
pub struct DependencyCache<F> {
    dependencies: HashMap<(F, F), Dependency<F>>,
    callees_of: HashMap<F, HashSet<F>>,
    callers_of: HashMap<F, HashSet<F>>,
    coverage: HashMap<(F, Coverage), u64>,
    hits: u64,
    misses: u64,
    pruned: u64,
}

impl<F: FunctionHandle> DependencyCache<F> {
    /// Start an empty cache for a new session.
    pub fn new_session() -> Self {
        DependencyCache {
            dependencies: HashMap::new(),
            callees_of: HashMap::new(),
            callers_of: HashMap::new(),
            coverage: HashMap::new(),
            hits: 0,
            misses: 0,
            pruned: 0,
        }
    }

    /// Get the dependency if it is present and still fresh.
    pub fn lookup(&self, caller: &F, callee: &F, versions: &dyn VersionSource) -> Option<&Dependency<F>> {
        self.dependencies
            .get(&(caller.clone(), callee.clone()))
            .filter(|dep| dep.is_fresh(versions))
    }

    /// Store the dependency with the current version of each endpoint's file.
    pub fn record(&mut self, caller: &F, callee: &F, versions: &dyn VersionSource) {
        let dep = Dependency::capture(caller.clone(), callee.clone(), versions);
        self.dependencies.insert((caller.clone(), callee.clone()), dep);
        self.callees_of
            .entry(caller.clone())
            .or_default()
            .insert(callee.clone());
        self.callers_of
            .entry(callee.clone())
            .or_default()
            .insert(caller.clone());
    }

    /// Remember that every neighbor of `function` in this direction has been recorded.
    pub fn mark_covered(&mut self, function: &F, coverage: Coverage, versions: &dyn VersionSource) {
        let token = coverage.token(function, versions);
        self.coverage.insert((function.clone(), coverage), token);
    }

    /// The complete cached neighbor set of `function`, if it can be trusted.
    ///
    /// Returns `None` when the set was never fully queried, when the coverage
    /// token moved, or when any of the dependencies involved went stale.
    pub fn cached_neighbors(
        &mut self,
        function: &F,
        coverage: Coverage,
        versions: &dyn VersionSource,
    ) -> Option<Vec<F>> {
        let neighbors = self.fresh_neighbors(function, coverage, versions);
        match neighbors {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        neighbors
    }

    fn fresh_neighbors(&self, function: &F, coverage: Coverage, versions: &dyn VersionSource) -> Option<Vec<F>> {
        let token = self.coverage.get(&(function.clone(), coverage))?;
        if *token != coverage.token(function, versions) {
            return None;
        }
        let index = match coverage {
            Coverage::Callees => &self.callees_of,
            Coverage::Callers => &self.callers_of,
        };
        let mut neighbors = Vec::new();
        for neighbor in index.get(function).into_iter().flatten() {
            let (caller, callee) = match coverage {
                Coverage::Callees => (function, neighbor),
                Coverage::Callers => (neighbor, function),
            };
            self.lookup(caller, callee, versions)?;
            neighbors.push(neighbor.clone());
        }
        neighbors.sort();
        Some(neighbors)
    }

    /// Replace the neighbor set of `function` with a freshly queried one and mark it covered.
    pub fn replace_neighbors(
        &mut self,
        function: &F,
        coverage: Coverage,
        neighbors: &[F],
        versions: &dyn VersionSource,
    ) {
        let previous: Vec<F> = match coverage {
            Coverage::Callees => self.callees_of.get(function),
            Coverage::Callers => self.callers_of.get(function),
        }
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default();

        for old in previous.iter().filter(|old| !neighbors.contains(old)) {
            match coverage {
                Coverage::Callees => self.remove_dependency(function, old),
                Coverage::Callers => self.remove_dependency(old, function),
            }
        }
        for neighbor in neighbors {
            match coverage {
                Coverage::Callees => self.record(function, neighbor, versions),
                Coverage::Callers => self.record(neighbor, function, versions),
            }
        }
        self.mark_covered(function, coverage, versions);
    }

    /// Remove one dependency. Coverage of both endpoints that relied on it is dropped.
    fn remove_dependency(&mut self, caller: &F, callee: &F) {
        self.dependencies.remove(&(caller.clone(), callee.clone()));
        if let Some(callees) = self.callees_of.get_mut(caller) {
            callees.remove(callee);
        }
        if let Some(callers) = self.callers_of.get_mut(callee) {
            callers.remove(caller);
        }
        self.coverage.remove(&(caller.clone(), Coverage::Callees));
        self.coverage.remove(&(callee.clone(), Coverage::Callers));
    }

    /// Drop every dependency that left `valid_scope` or whose files changed.
    /// Returns the number of dependencies removed.
    pub fn prune(&mut self, valid_scope: &HashSet<F>, versions: &dyn VersionSource) -> usize {
        let stale: Vec<(F, F)> = self
            .dependencies
            .iter()
            .filter(|((caller, callee), dep)| {
                !valid_scope.contains(caller) || !valid_scope.contains(callee) || !dep.is_fresh(versions)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for (caller, callee) in &stale {
            self.remove_dependency(caller, callee);
        }

        self.coverage.retain(|(function, coverage), token| {
            valid_scope.contains(function) && *token == coverage.token(function, versions)
        });
        self.callees_of.retain(|_, callees| !callees.is_empty());
        self.callers_of.retain(|_, callers| !callers.is_empty());

        self.pruned += stale.len() as u64;
        tracing::debug!(
            "Pruned {} stale dependencies, {} remain",
            stale.len(),
            self.dependencies.len()
        );
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.callees_of.clear();
        self.callers_of.clear();
        self.coverage.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.dependencies.len(),
            hits: self.hits,
            misses: self.misses,
            pruned: self.pruned,
        }
    }
}

impl<F: FunctionHandle> Default for DependencyCache<F> {
    fn default() -> Self {
        Self::new_session()
    }
}
