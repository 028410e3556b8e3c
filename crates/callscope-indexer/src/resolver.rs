//! Breadth-first transitive closure over the call index
//!
//! Each direction runs as an explicit worklist: a frontier of functions is
//! queried (in parallel when enabled), its neighbors are recorded as
//! caller → callee edges, and the next frontier is every neighbor not seen
//! before. A round is a synchronization point: the cache only receives a
//! round's answers after every query of that round succeeded, so a cancelled
//! or failed build leaves nothing half-written behind.

use crate::index::{CallIndex, IndexError};
use callscope_core::{CancelFlag, Coverage, DependencyCache, FunctionHandle, VersionSource};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::debug;

/// Which way to follow calls from the seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Transitive callers.
    Upstream,
    /// Transitive callees.
    Downstream,
    /// Both closures, unioned.
    Both,
}

impl Direction {
    fn coverages(self) -> &'static [Coverage] {
        match self {
            Direction::Upstream => &[Coverage::Callers],
            Direction::Downstream => &[Coverage::Callees],
            Direction::Both => &[Coverage::Callers, Coverage::Callees],
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// The result of a resolve call. Edges are always oriented caller → callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<F: Ord> {
    /// Seeds plus every function reached from them.
    pub functions: BTreeSet<F>,
    pub edges: BTreeSet<(F, F)>,
    /// Functions whose neighbors were answered, from the cache or the index.
    pub processed: usize,
}

impl<F: Ord> Default for Resolution<F> {
    fn default() -> Self {
        Resolution {
            functions: BTreeSet::new(),
            edges: BTreeSet::new(),
            processed: 0,
        }
    }
}

type ProgressFn<'a> = &'a (dyn Fn(usize) + Sync);

/// Resolves call closures against an index, reusing a dependency cache.
pub struct ClosureResolver<'a, F, I: ?Sized> {
    index: &'a I,
    cache: &'a mut DependencyCache<F>,
    versions: &'a dyn VersionSource,
    cancel: CancelFlag,
    parallel: bool,
    progress: Option<ProgressFn<'a>>,
    processed: AtomicUsize,
}

impl<'a, F, I> ClosureResolver<'a, F, I>
where
    F: FunctionHandle,
    I: CallIndex<F> + ?Sized,
{
    pub fn new(index: &'a I, cache: &'a mut DependencyCache<F>, versions: &'a dyn VersionSource) -> Self {
        ClosureResolver {
            index,
            cache,
            versions,
            cancel: CancelFlag::new(),
            parallel: true,
            progress: None,
            processed: AtomicUsize::new(0),
        }
    }

    /// Stop between rounds and before each index query once `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Query the functions of one round concurrently.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Called with the running count of processed functions.
    pub fn on_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Transitive closure of `seeds` in `direction`.
    pub fn resolve(&mut self, seeds: &[F], direction: Direction) -> Result<Resolution<F>, ResolveError> {
        let mut resolution = Resolution::default();
        resolution.functions.extend(seeds.iter().cloned());

        for &coverage in direction.coverages() {
            self.close(seeds, coverage, &mut resolution)?;
        }

        resolution.processed = self.processed.load(Ordering::SeqCst);
        debug!(
            "Resolved {:?} closure of {} seeds: {} functions, {} edges",
            direction,
            seeds.len(),
            resolution.functions.len(),
            resolution.edges.len()
        );
        Ok(resolution)
    }

    /// Call edges with both endpoints inside `scope`, one hop, no expansion.
    pub fn resolve_within(&mut self, scope: &BTreeSet<F>) -> Result<Resolution<F>, ResolveError> {
        let mut resolution = Resolution {
            functions: scope.clone(),
            ..Resolution::default()
        };
        let functions: Vec<F> = scope.iter().cloned().collect();

        for (callee, callers) in self.answer_round(&functions, Coverage::Callers)? {
            for caller in callers.into_iter().filter(|caller| scope.contains(caller)) {
                resolution.edges.insert((caller, callee.clone()));
            }
        }

        resolution.processed = self.processed.load(Ordering::SeqCst);
        debug!(
            "Resolved {} scope functions: {} edges inside scope",
            scope.len(),
            resolution.edges.len()
        );
        Ok(resolution)
    }

    /// Every call with at least one endpoint inside `scope`, one hop, no expansion.
    ///
    /// A scope function counts as processed once both its callers and its
    /// callees are known, so progress runs up to `scope.len()`.
    pub fn resolve_adjacent(&mut self, scope: &BTreeSet<F>) -> Result<Resolution<F>, ResolveError> {
        let mut resolution = Resolution {
            functions: scope.clone(),
            ..Resolution::default()
        };
        let functions: Vec<F> = scope.iter().cloned().collect();

        for (caller, callees) in self.answer_round_counted(&functions, Coverage::Callees, false)? {
            for callee in callees {
                resolution.functions.insert(callee.clone());
                resolution.edges.insert((caller.clone(), callee));
            }
        }
        for (callee, callers) in self.answer_round(&functions, Coverage::Callers)? {
            for caller in callers {
                resolution.functions.insert(caller.clone());
                resolution.edges.insert((caller, callee.clone()));
            }
        }

        resolution.processed = self.processed.load(Ordering::SeqCst);
        debug!(
            "Resolved {} scope functions: {} functions, {} edges touching scope",
            scope.len(),
            resolution.functions.len(),
            resolution.edges.len()
        );
        Ok(resolution)
    }

    fn close(&mut self, seeds: &[F], coverage: Coverage, resolution: &mut Resolution<F>) -> Result<(), ResolveError> {
        let mut seen: HashSet<F> = HashSet::new();
        let mut frontier: Vec<F> = seeds.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let mut round = 0usize;

        while !frontier.is_empty() {
            round += 1;
            let answers = self.answer_round(&frontier, coverage)?;
            seen.extend(frontier.iter().cloned());

            let mut next = BTreeSet::new();
            for (function, neighbors) in answers {
                for neighbor in neighbors {
                    let edge = match coverage {
                        Coverage::Callees => (function.clone(), neighbor.clone()),
                        Coverage::Callers => (neighbor.clone(), function.clone()),
                    };
                    resolution.edges.insert(edge);
                    resolution.functions.insert(neighbor.clone());
                    if !seen.contains(&neighbor) {
                        next.insert(neighbor);
                    }
                }
            }
            debug!("{:?} round {}: {} functions, {} new", coverage, round, frontier.len(), next.len());
            frontier = next.into_iter().collect();
        }
        Ok(())
    }

    /// Neighbors of every function in `round`, served from the cache where it is
    /// still trustworthy. Fresh answers are committed only once all succeeded.
    fn answer_round(&mut self, round: &[F], coverage: Coverage) -> Result<Vec<(F, Vec<F>)>, ResolveError> {
        self.answer_round_counted(round, coverage, true)
    }

    /// [`answer_round`](Self::answer_round), optionally without reporting progress.
    fn answer_round_counted(
        &mut self,
        round: &[F],
        coverage: Coverage,
        count: bool,
    ) -> Result<Vec<(F, Vec<F>)>, ResolveError> {
        self.check_cancelled()?;

        let mut answers = Vec::with_capacity(round.len());
        let mut pending = Vec::new();
        for function in round {
            match self.cache.cached_neighbors(function, coverage, self.versions) {
                Some(neighbors) => {
                    if count {
                        self.tick();
                    }
                    answers.push((function.clone(), neighbors));
                }
                None => pending.push(function.clone()),
            }
        }

        let queried = self.query_all(&pending, coverage, count)?;
        for (function, neighbors) in &queried {
            self.cache.replace_neighbors(function, coverage, neighbors, self.versions);
        }
        answers.extend(queried);
        Ok(answers)
    }

    fn query_all(&self, pending: &[F], coverage: Coverage, count: bool) -> Result<Vec<(F, Vec<F>)>, ResolveError> {
        if self.parallel {
            pending
                .par_iter()
                .map(|function| self.query(function, coverage, count).map(|n| (function.clone(), n)))
                .collect()
        } else {
            pending
                .iter()
                .map(|function| self.query(function, coverage, count).map(|n| (function.clone(), n)))
                .collect()
        }
    }

    fn query(&self, function: &F, coverage: Coverage, count: bool) -> Result<Vec<F>, ResolveError> {
        self.check_cancelled()?;
        let neighbors = match coverage {
            Coverage::Callers => self.index.find_callers(function)?,
            Coverage::Callees => self.index.find_callees(function)?,
        };
        if count {
            self.tick();
        }
        Ok(neighbors.into_iter().collect())
    }

    fn check_cancelled(&self) -> Result<(), ResolveError> {
        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        Ok(())
    }

    fn tick(&self) {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(progress) = self.progress {
            progress(processed);
        }
    }
}
