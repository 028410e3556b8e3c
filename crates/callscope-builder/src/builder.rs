//! Build orchestration: scope → closure → graph → layout
//!
//! At most one build is in flight per [`GraphBuilder`]. Starting a build
//! cancels the previous one, and the dependency cache lock serializes the
//! resolution phases, so two builds never touch the cache at the same time.
//! Results are only published once a build ran to completion.

use crate::config::CallscopeConfig;
use callscope_core::{
    CacheStats, CancelFlag, DependencyCache, FunctionHandle, Graph, GraphError, VersionSource,
};
use callscope_indexer::{CallIndex, ClosureResolver, Direction, Resolution, ResolveError, Scope};
use callscope_layout::{LayoutError, LayoutNormalizer, LayoutOracle};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// What to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildRequest<F> {
    /// Every function in `scope`. Limited builds keep only edges inside the scope;
    /// unlimited builds also keep calls crossing its border, one hop out.
    Scope { scope: Scope, limited: bool },
    /// The closure of the focused functions.
    Focus { seeds: Vec<F>, direction: Direction },
}

impl<F> BuildRequest<F> {
    /// Whether the number of functions to process is known upfront.
    fn total(&self, scope_size: usize) -> Option<usize> {
        match self {
            BuildRequest::Scope { .. } => Some(scope_size),
            BuildRequest::Focus { .. } => None,
        }
    }
}

/// Lifecycle signals of a build, tagged with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    Started { build: u64 },
    Progress { build: u64, processed: usize, total: Option<usize> },
    Warning { build: u64, message: String },
    Completed { build: u64, nodes: usize, edges: usize },
    Cancelled { build: u64 },
    Failed { build: u64, message: String },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build cancelled")]
    Cancelled,

    #[error("call resolution failed: {0}")]
    Resolve(#[source] ResolveError),

    #[error("layout failed: {0}")]
    Layout(#[source] LayoutError),

    #[error("graph contract violated: {0}")]
    Contract(#[from] GraphError),

    #[error("build task failed: {0}")]
    Join(String),
}

impl From<ResolveError> for BuildError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Cancelled => BuildError::Cancelled,
            other => BuildError::Resolve(other),
        }
    }
}

impl From<LayoutError> for BuildError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::Cancelled => BuildError::Cancelled,
            other => BuildError::Layout(other),
        }
    }
}

/// Add every resolved function as a node, then every edge.
pub fn assemble<F: FunctionHandle>(resolution: &Resolution<F>) -> Result<Graph<F>, GraphError> {
    let mut graph = Graph::new();
    for function in &resolution.functions {
        graph.add_node(function.clone());
    }
    for (caller, callee) in &resolution.edges {
        graph.add_edge(caller, callee)?;
    }
    Ok(graph)
}

/// Owns the session cache and runs builds against an index and a layout oracle.
pub struct GraphBuilder<F> {
    index: RwLock<Arc<dyn CallIndex<F>>>,
    oracle: Arc<dyn LayoutOracle>,
    versions: Arc<dyn VersionSource>,
    config: CallscopeConfig,
    cache: Arc<Mutex<DependencyCache<F>>>,
    in_flight: Mutex<Option<CancelFlag>>,
    builds: AtomicU64,
    latest: Mutex<Option<(u64, Arc<Graph<F>>)>>,
    events: broadcast::Sender<BuildEvent>,
}

impl<F: FunctionHandle + 'static> GraphBuilder<F> {
    /// Start a session with an empty dependency cache.
    pub fn new(
        index: Arc<dyn CallIndex<F>>,
        oracle: Arc<dyn LayoutOracle>,
        versions: Arc<dyn VersionSource>,
        config: CallscopeConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        GraphBuilder {
            index: RwLock::new(index),
            oracle,
            versions,
            config,
            cache: Arc::new(Mutex::new(DependencyCache::new_session())),
            in_flight: Mutex::new(None),
            builds: AtomicU64::new(0),
            latest: Mutex::new(None),
            events,
        }
    }

    /// Subscribe to build lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    /// Replace the index, e.g. after the manifest changed. Applies to the next build.
    pub fn set_index(&self, index: Arc<dyn CallIndex<F>>) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
    }

    pub fn config(&self) -> &CallscopeConfig {
        &self.config
    }

    /// Number of builds started in this session.
    pub fn builds_started(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// The graph of the last successful build.
    pub fn latest(&self) -> Option<Arc<Graph<F>>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, graph)| Arc::clone(graph))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).stats()
    }

    /// Ask the in-flight build, if any, to stop.
    pub fn cancel_current(&self) {
        if let Some(cancel) = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            cancel.cancel();
        }
    }

    /// Cancel whatever is running and register a new build.
    pub(crate) fn begin(&self) -> (u64, CancelFlag) {
        let cancel = CancelFlag::new();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = in_flight.replace(cancel.clone()) {
            debug!("Cancelling previous build");
            previous.cancel();
        }
        let build = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        (build, cancel)
    }

    fn finish(&self, cancel: &CancelFlag) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.as_ref().is_some_and(|current| current.same_as(cancel)) {
            *in_flight = None;
        }
    }

    /// Store the graph of `build` unless a newer build has started since.
    pub(crate) fn publish(&self, build: u64, graph: &Arc<Graph<F>>) -> bool {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let superseded = self.builds.load(Ordering::SeqCst) != build
            || latest.as_ref().is_some_and(|(published, _)| *published > build);
        if superseded {
            return false;
        }
        *latest = Some((build, Arc::clone(graph)));
        true
    }

    fn emit(&self, event: BuildEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run one build off the async runtime. Returns the laid-out graph.
    pub async fn build(&self, request: BuildRequest<F>) -> Result<Arc<Graph<F>>, BuildError> {
        let (build, cancel) = self.begin();
        info!("Starting build {}: {:?}", build, request);

        let job = BuildJob {
            build,
            index: Arc::clone(&*self.index.read().unwrap_or_else(PoisonError::into_inner)),
            oracle: Arc::clone(&self.oracle),
            versions: Arc::clone(&self.versions),
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            cancel: cancel.clone(),
            events: self.events.clone(),
        };
        let result = tokio::task::spawn_blocking(move || job.run(request))
            .await
            .map_err(|e| BuildError::Join(e.to_string()))
            .and_then(|result| result);
        self.finish(&cancel);

        match result {
            Ok(graph) => {
                let graph = Arc::new(graph);
                if !self.publish(build, &graph) {
                    info!("Build {} superseded by a newer build", build);
                    self.emit(BuildEvent::Cancelled { build });
                    return Err(BuildError::Cancelled);
                }
                info!(
                    "Build {} completed: {} nodes, {} edges",
                    build,
                    graph.node_count(),
                    graph.edge_count()
                );
                self.emit(BuildEvent::Completed {
                    build,
                    nodes: graph.node_count(),
                    edges: graph.edge_count(),
                });
                Ok(graph)
            }
            Err(BuildError::Cancelled) => {
                info!("Build {} cancelled", build);
                self.emit(BuildEvent::Cancelled { build });
                Err(BuildError::Cancelled)
            }
            Err(e) => {
                error!("Build {} failed: {}", build, e);
                self.emit(BuildEvent::Failed {
                    build,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

/// Everything one build needs, detached from the builder so it can run on a blocking thread.
struct BuildJob<F> {
    build: u64,
    index: Arc<dyn CallIndex<F>>,
    oracle: Arc<dyn LayoutOracle>,
    versions: Arc<dyn VersionSource>,
    config: CallscopeConfig,
    cache: Arc<Mutex<DependencyCache<F>>>,
    cancel: CancelFlag,
    events: broadcast::Sender<BuildEvent>,
}

impl<F: FunctionHandle> BuildJob<F> {
    fn emit(&self, event: BuildEvent) {
        let _ = self.events.send(event);
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        Ok(())
    }

    /// Functions in `scope`. A scope that vanished is reported and treated as empty.
    fn scope_functions(&self, scope: &Scope) -> Result<BTreeSet<F>, BuildError> {
        match self.index.all_functions(scope) {
            Ok(functions) => Ok(functions),
            Err(e) if e.is_scope_error() => {
                warn!("{}; building an empty graph", e);
                self.emit(BuildEvent::Warning {
                    build: self.build,
                    message: e.to_string(),
                });
                Ok(BTreeSet::new())
            }
            Err(e) => Err(ResolveError::from(e).into()),
        }
    }

    fn run(self, request: BuildRequest<F>) -> Result<Graph<F>, BuildError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_cancelled()?;
        self.emit(BuildEvent::Started { build: self.build });

        let project: HashSet<F> = self
            .index
            .all_functions(&Scope::whole_project())
            .map_err(ResolveError::from)?
            .into_iter()
            .collect();
        cache.prune(&project, &*self.versions);

        let scope = match &request {
            BuildRequest::Scope { scope, .. } => Some(self.scope_functions(scope)?),
            BuildRequest::Focus { .. } => None,
        };
        let total = request.total(scope.as_ref().map_or(0, BTreeSet::len));
        let progress = |processed: usize| {
            let _ = self.events.send(BuildEvent::Progress {
                build: self.build,
                processed,
                total,
            });
        };

        let mut resolver = ClosureResolver::new(&*self.index, &mut cache, &*self.versions)
            .with_cancel(self.cancel.clone())
            .parallel(self.config.resolver.parallel)
            .on_progress(&progress);
        let resolution = match (&request, scope) {
            (BuildRequest::Scope { limited: true, .. }, Some(functions)) => resolver.resolve_within(&functions)?,
            (BuildRequest::Scope { .. }, Some(functions)) => resolver.resolve_adjacent(&functions)?,
            (BuildRequest::Focus { seeds, direction }, _) => resolver.resolve(seeds, *direction)?,
            (BuildRequest::Scope { .. }, None) => Resolution::default(),
        };
        drop(resolver);

        let stats = cache.stats();
        debug!(
            "Dependency cache: {} entries, {} hits, {} misses, {} pruned",
            stats.entries, stats.hits, stats.misses, stats.pruned
        );
        drop(cache);

        let mut graph = assemble(&resolution)?;
        self.check_cancelled()?;

        LayoutNormalizer::new(&*self.oracle, self.config.layout)
            .with_cancel(self.cancel.clone())
            .parallel(self.config.resolver.parallel)
            .layout(&mut graph)?;
        self.check_cancelled()?;
        Ok(graph)
    }
}
