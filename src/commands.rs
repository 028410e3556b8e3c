//! CLI command implementations

use crate::{BuildArgs, DirectionArg, IndexArgs};
use anyhow::{Context, bail};
use callscope_builder::{BuildError, BuildEvent, BuildRequest, CallscopeConfig, GraphBuilder};
use callscope_core::{FunctionRef, Graph, Point, VersionSource, ViewTransform, Viewport};
use callscope_indexer::{CallIndex, Direction, Scope, StaticIndex};
use callscope_layout::{GraphvizOracle, LayoutOracle};
use callscope_watcher::{FileVersions, VersionWatcher, WatchEvent};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default manifest name in the repository root.
const MANIFEST_FILE: &str = "callscope.json";

/// Quiet period after a change before rebuilding.
const DEBOUNCE: Duration = Duration::from_millis(200);

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Upstream => Direction::Upstream,
            DirectionArg::Downstream => Direction::Downstream,
            DirectionArg::Both => Direction::Both,
        }
    }
}

#[derive(Serialize)]
struct NodeOutput<'a> {
    id: String,
    name: &'a str,
    qualified_name: &'a str,
    file: &'a Path,
    line: Option<u32>,
    x: f64,
    y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<Point>,
}

#[derive(Serialize)]
struct EdgeOutput {
    source: String,
    target: String,
}

#[derive(Serialize)]
struct GraphOutput<'a> {
    nodes: Vec<NodeOutput<'a>>,
    edges: Vec<EdgeOutput>,
}

pub async fn build(root: PathBuf, args: BuildArgs) -> anyhow::Result<()> {
    let index = Arc::new(load_index(&root, &args.index)?);
    let config = load_config(&root, &args.index)?;
    let request = build_request(&index, &args)?;
    let viewport = args.viewport.as_deref().map(parse_viewport).transpose()?;

    let versions: Arc<dyn VersionSource> = Arc::new(FileVersions::with_root(index.root()));
    let oracle: Arc<dyn LayoutOracle> = Arc::new(GraphvizOracle::new(config.graphviz.clone()));
    let builder: GraphBuilder<FunctionRef> = GraphBuilder::new(index, oracle, versions, config);

    let graph = builder.build(request).await?;
    print_graph(&graph, viewport)
}

pub fn functions(root: PathBuf, args: IndexArgs, scope: &str) -> anyhow::Result<()> {
    let index = load_index(&root, &args)?;
    let scope = parse_scope(scope)?;

    let functions = index.all_functions(&scope)?;
    tracing::info!("{} holds {} functions", scope, functions.len());
    for function in &functions {
        println!("{}", function);
    }
    Ok(())
}

pub async fn watch(root: PathBuf, args: BuildArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&root)
        .with_context(|| format!("repository root {} does not exist", root.display()))?;
    let manifest = manifest_path(&root, &args.index);
    let manifest = std::fs::canonicalize(&manifest).unwrap_or(manifest);

    let index = Arc::new(StaticIndex::load(&manifest)?);
    let config = load_config(&root, &args.index)?;
    let mut request = build_request(&index, &args)?;
    let viewport = args.viewport.as_deref().map(parse_viewport).transpose()?;

    let versions = Arc::new(FileVersions::with_root(index.root()));
    let oracle: Arc<dyn LayoutOracle> = Arc::new(GraphvizOracle::new(config.graphviz.clone()));
    let builder = Arc::new(GraphBuilder::<FunctionRef>::new(
        index,
        oracle,
        Arc::clone(&versions) as Arc<dyn VersionSource>,
        config,
    ));

    let mut watcher = VersionWatcher::new(&root, versions)?;
    watcher.start()?;

    let mut events = builder.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!("Skipped {} build events", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                BuildEvent::Warning { message, .. } => tracing::warn!("{}", message),
                BuildEvent::Progress { processed, total, .. } => match total {
                    Some(total) => tracing::debug!("Processed {}/{} functions", processed, total),
                    None => tracing::debug!("Processed {} functions", processed),
                },
                _ => {}
            }
        }
    });

    spawn_build(&builder, request.clone(), viewport);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                builder.cancel_current();
                watcher.stop()?;
                return Ok(());
            }
            event = watcher.next_event() => {
                let Some(event) = event else {
                    bail!("file watcher stopped unexpectedly");
                };
                tokio::time::sleep(DEBOUNCE).await;
                let mut changed = vec![event];
                changed.extend(watcher.drain_pending());
                tracing::info!("{} file changes, rebuilding", changed.len());

                if changed.iter().any(|event| event.path() == manifest.as_path()) {
                    if let Some(fresh) = reload_index(&builder, &manifest, &changed, &args) {
                        request = fresh;
                    }
                }
                spawn_build(&builder, request.clone(), viewport);
            }
        }
    }
}

/// Load the changed manifest and swap it in. A manifest that fails to load, or
/// no longer holds the seeds, keeps the old index and request.
fn reload_index(
    builder: &GraphBuilder<FunctionRef>,
    manifest: &Path,
    changed: &[WatchEvent],
    args: &BuildArgs,
) -> Option<BuildRequest<FunctionRef>> {
    if changed.iter().any(|event| matches!(event, WatchEvent::Removed(path) if path == manifest)) {
        tracing::warn!("Index manifest {} was removed; keeping the loaded index", manifest.display());
        return None;
    }
    let index = match StaticIndex::load(manifest) {
        Ok(index) => index,
        Err(e) => {
            tracing::error!("Failed to reload {}: {}", manifest.display(), e);
            return None;
        }
    };
    match swap_index(builder, index, args) {
        Ok(request) => Some(request),
        Err(e) => {
            tracing::error!("Keeping the loaded index: {}", e);
            None
        }
    }
}

/// Install `index` and resolve the request against it, so seeds are the
/// handles of the new index rather than the ones they replaced.
fn swap_index(
    builder: &GraphBuilder<FunctionRef>,
    index: StaticIndex,
    args: &BuildArgs,
) -> anyhow::Result<BuildRequest<FunctionRef>> {
    let request = build_request(&index, args)?;
    builder.set_index(Arc::new(index));
    Ok(request)
}

/// Start a build in the background. The builder cancels whichever build it replaces.
fn spawn_build(
    builder: &Arc<GraphBuilder<FunctionRef>>,
    request: BuildRequest<FunctionRef>,
    viewport: Option<Viewport>,
) {
    let builder = Arc::clone(builder);
    tokio::spawn(async move {
        match builder.build(request).await {
            Ok(graph) => {
                if let Err(e) = print_graph(&graph, viewport) {
                    tracing::error!("Failed to print graph: {}", e);
                }
            }
            Err(BuildError::Cancelled) => {}
            Err(e) => tracing::error!("Build failed: {}", e),
        }
    });
}

fn manifest_path(root: &Path, args: &IndexArgs) -> PathBuf {
    args.index.clone().unwrap_or_else(|| root.join(MANIFEST_FILE))
}

fn load_index(root: &Path, args: &IndexArgs) -> anyhow::Result<StaticIndex> {
    let path = manifest_path(root, args);
    StaticIndex::load(&path).with_context(|| format!("failed to load index {}", path.display()))
}

fn load_config(root: &Path, args: &IndexArgs) -> anyhow::Result<CallscopeConfig> {
    let config = match &args.config {
        Some(path) => CallscopeConfig::load(path)?,
        None => CallscopeConfig::discover(root)?,
    };
    Ok(config)
}

fn build_request(index: &StaticIndex, args: &BuildArgs) -> anyhow::Result<BuildRequest<FunctionRef>> {
    if let Some(scope) = &args.scope {
        return Ok(BuildRequest::Scope {
            scope: parse_scope(scope)?,
            limited: args.limited,
        });
    }
    if args.seeds.is_empty() {
        bail!("nothing to build: pass --seed or --scope");
    }
    let seeds = args
        .seeds
        .iter()
        .map(|name| index.lookup(name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BuildRequest::Focus {
        seeds,
        direction: args.direction.into(),
    })
}

/// `project`, `project-no-tests`, `module:<name>` or `dir:<path>`.
fn parse_scope(text: &str) -> anyhow::Result<Scope> {
    let scope = match text.split_once(':') {
        None if text == "project" => Scope::whole_project(),
        None if text == "project-no-tests" => Scope::Project { include_tests: false },
        Some(("module", name)) if !name.is_empty() => Scope::Module(name.to_string()),
        Some(("dir", path)) if !path.is_empty() => Scope::Directory(PathBuf::from(path)),
        _ => bail!("unknown scope '{}'", text),
    };
    Ok(scope)
}

/// `<width>x<height>` in device pixels.
fn parse_viewport(text: &str) -> anyhow::Result<Viewport> {
    let (width, height) = text
        .split_once('x')
        .with_context(|| format!("viewport '{}' is not WIDTHxHEIGHT", text))?;
    let width: f64 = width.trim().parse().context("invalid viewport width")?;
    let height: f64 = height.trim().parse().context("invalid viewport height")?;
    if !(width > 0.0 && height > 0.0) {
        bail!("viewport must have a positive size");
    }
    Ok(Viewport::new(width, height))
}

fn print_graph(graph: &Graph<FunctionRef>, viewport: Option<Viewport>) -> anyhow::Result<()> {
    let view = ViewTransform::new();
    let mut nodes: Vec<NodeOutput> = graph
        .nodes()
        .map(|node| NodeOutput {
            id: node.id.to_string(),
            name: &node.function.name,
            qualified_name: &node.function.qualified_name,
            file: &node.function.file_path,
            line: node.function.line,
            x: node.point.x,
            y: node.point.y,
            device: viewport.map(|viewport| view.to_device(node.point, viewport)),
        })
        .collect();
    nodes.sort_by(|a, b| a.qualified_name.cmp(b.qualified_name));

    let mut edges: Vec<EdgeOutput> = graph
        .edges()
        .map(|edge| EdgeOutput {
            source: edge.source.to_string(),
            target: edge.target.to_string(),
        })
        .collect();
    edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

    let output = GraphOutput { nodes, edges };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
