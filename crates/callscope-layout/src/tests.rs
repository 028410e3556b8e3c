//! Unit tests for the layout pipeline

use crate::*;
use callscope_core::{CancelFlag, FunctionRef, Graph, NodeId, Point};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn func(name: &str) -> FunctionRef {
    FunctionRef::new(format!("crate::{}", name), name, format!("src/{}.rs", name))
}

fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> Graph<FunctionRef> {
    let mut graph = Graph::new();
    for name in nodes {
        graph.add_node(func(name));
    }
    for (source, target) in edges {
        graph.add_edge(&func(source), &func(target)).unwrap();
    }
    graph
}

fn point_of(graph: &Graph<FunctionRef>, name: &str) -> Point {
    graph.node_of(&func(name)).unwrap().point
}

/// Layered layout in the style of a left-to-right drawing service: x is the
/// longest distance from a root, y the position inside that rank, in points.
#[derive(Default)]
struct RankOracle {
    calls: AtomicUsize,
    requests: Mutex<Vec<LayoutRequest>>,
}

impl LayoutOracle for RankOracle {
    fn layout(&self, request: &LayoutRequest) -> Result<RawLayout, LayoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let mut rank: HashMap<&str, usize> = request.nodes.iter().map(|n| (n.as_str(), 0)).collect();
        // relax edges a bounded number of times so cycles terminate
        for _ in 0..request.nodes.len() {
            for (source, target) in &request.edges {
                if source != target && rank[source.as_str()] + 1 > rank[target.as_str()] {
                    let next = (rank[source.as_str()] + 1).min(request.nodes.len());
                    rank.insert(target.as_str(), next);
                }
            }
        }

        let mut per_rank: BTreeMap<usize, usize> = BTreeMap::new();
        let mut positions = HashMap::new();
        for node in &request.nodes {
            let r = rank[node.as_str()];
            let slot = per_rank.entry(r).or_insert(0);
            positions.insert(node.clone(), Point::new(27.0 + 72.0 * r as f64, 18.0 + 36.0 * *slot as f64));
            *slot += 1;
        }
        Ok(RawLayout {
            positions,
            extent: Extent::default(),
        })
    }
}

/// Returns fixed positions keyed by function name.
struct FixedOracle {
    positions: HashMap<String, Point>,
}

impl FixedOracle {
    fn new(points: &[(&str, f64, f64)]) -> Self {
        FixedOracle {
            positions: points
                .iter()
                .map(|&(name, x, y)| (NodeId::of(&func(name)).to_string(), Point::new(x, y)))
                .collect(),
        }
    }
}

impl LayoutOracle for FixedOracle {
    fn layout(&self, request: &LayoutRequest) -> Result<RawLayout, LayoutError> {
        let positions = request
            .nodes
            .iter()
            .filter_map(|n| self.positions.get(n).map(|p| (n.clone(), *p)))
            .collect();
        Ok(RawLayout {
            positions,
            extent: Extent::default(),
        })
    }
}

/// Fails on any component larger than `limit` nodes.
struct FlakyOracle {
    limit: usize,
}

impl LayoutOracle for FlakyOracle {
    fn layout(&self, request: &LayoutRequest) -> Result<RawLayout, LayoutError> {
        if request.nodes.len() > self.limit {
            return Err(LayoutError::Malformed("truncated response".into()));
        }
        RankOracle::default().layout(request)
    }
}

fn assert_within_inset(graph: &Graph<FunctionRef>, inset: f64) {
    for node in graph.nodes() {
        let p = node.point;
        assert!(
            p.x >= inset - 1e-12 && p.x <= 1.0 - inset + 1e-12,
            "x out of bounds: {:?}",
            p
        );
        assert!(
            p.y >= inset - 1e-12 && p.y <= 1.0 - inset + 1e-12,
            "y out of bounds: {:?}",
            p
        );
        assert_eq!(node.point, node.raw_layout_point);
    }
}

#[test]
fn test_single_node_skips_oracle() {
    let oracle = RankOracle::default();
    let mut graph = graph(&["main"], &[]);

    LayoutNormalizer::new(&oracle, LayoutSettings::default())
        .layout(&mut graph)
        .unwrap();

    assert_eq!(point_of(&graph, "main"), Point::new(0.5, 0.5));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_empty_graph_is_a_no_op() {
    let oracle = RankOracle::default();
    let mut graph: Graph<FunctionRef> = Graph::new();
    assert!(LayoutNormalizer::new(&oracle, LayoutSettings::default())
        .layout(&mut graph)
        .is_ok());
}

#[test]
fn test_small_component_is_stacked_below_tall_one() {
    // a diamond spanning three rows, plus a lone function
    let oracle = FixedOracle::new(&[("a", 27.0, 54.0), ("b", 99.0, 18.0), ("c", 99.0, 90.0), ("d", 171.0, 54.0)]);
    let mut graph = graph(
        &["a", "b", "c", "d", "lonely"],
        &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
    );
    let settings = LayoutSettings::default();

    LayoutNormalizer::new(&oracle, settings).layout(&mut graph).unwrap();

    let lonely = point_of(&graph, "lonely");
    let lowest_of_diamond = ["a", "b", "c", "d"]
        .iter()
        .map(|name| point_of(&graph, name).y)
        .fold(f64::MIN, f64::max);
    assert!(lonely.y - lowest_of_diamond >= settings.grid_size - 1e-12);
    assert_within_inset(&graph, settings.inset);
}

#[test]
fn test_components_share_left_baseline() {
    let oracle = RankOracle::default();
    let mut graph = graph(&["a", "b", "c", "x", "y"], &[("a", "b"), ("b", "c"), ("x", "y")]);

    LayoutNormalizer::new(&oracle, LayoutSettings::default())
        .layout(&mut graph)
        .unwrap();

    assert!((point_of(&graph, "a").x - 0.1).abs() < 1e-12);
    assert!((point_of(&graph, "x").x - 0.1).abs() < 1e-12);
    assert!((point_of(&graph, "c").x - 0.9).abs() < 1e-12);
}

#[test]
fn test_viewport_bounds_on_varied_graphs() {
    let shapes: Vec<(Vec<&str>, Vec<(&str, &str)>)> = vec![
        (vec!["a", "b"], vec![("a", "b")]),
        (vec!["a", "b", "c"], vec![("a", "b"), ("b", "c"), ("c", "a")]),
        (vec!["a", "b", "c", "d", "e"], vec![("a", "b"), ("a", "c"), ("a", "d"), ("a", "e")]),
        (vec!["r", "r2", "s", "t", "u", "v"], vec![("r", "r"), ("s", "t"), ("u", "v"), ("v", "u")]),
        (vec!["p", "q", "z"], vec![]),
    ];
    let oracle = RankOracle::default();

    for inset in [0.1, 0.05, 0.25] {
        let settings = LayoutSettings {
            inset,
            ..LayoutSettings::default()
        };
        for (nodes, edges) in &shapes {
            let mut graph = graph(nodes, edges);
            LayoutNormalizer::new(&oracle, settings).layout(&mut graph).unwrap();
            assert_within_inset(&graph, inset);
        }
    }
}

#[test]
fn test_layout_is_deterministic() {
    let nodes = ["main", "parse", "lex", "emit", "report", "orphan", "self_call"];
    let edges = [
        ("main", "parse"),
        ("parse", "lex"),
        ("main", "emit"),
        ("emit", "report"),
        ("report", "main"),
        ("self_call", "self_call"),
    ];
    let oracle = RankOracle::default();

    let run = |parallel: bool| {
        let mut graph = graph(&nodes, &edges);
        LayoutNormalizer::new(&oracle, LayoutSettings::default())
            .parallel(parallel)
            .layout(&mut graph)
            .unwrap();
        nodes
            .iter()
            .map(|name| {
                let p = point_of(&graph, name);
                (p.x.to_bits(), p.y.to_bits())
            })
            .collect::<Vec<_>>()
    };

    let first = run(true);
    assert_eq!(first, run(true));
    assert_eq!(first, run(false));
}

#[test]
fn test_request_is_sorted_by_display_name() {
    let oracle = RankOracle::default();
    let mut graph = graph(&["zeta", "alpha", "mid"], &[("zeta", "mid"), ("zeta", "alpha"), ("alpha", "mid")]);

    LayoutNormalizer::new(&oracle, LayoutSettings::default())
        .layout(&mut graph)
        .unwrap();

    let requests = oracle.requests.lock().unwrap();
    let id = |name: &str| NodeId::of(&func(name)).to_string();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].nodes, vec![id("alpha"), id("mid"), id("zeta")]);
    assert_eq!(
        requests[0].edges,
        vec![
            (id("alpha"), id("mid")),
            (id("zeta"), id("alpha")),
            (id("zeta"), id("mid")),
        ]
    );
}

#[test]
fn test_oracle_failure_leaves_graph_untouched() {
    let oracle = FlakyOracle { limit: 2 };
    let mut graph = graph(&["a", "b", "c", "x", "y"], &[("a", "b"), ("b", "c"), ("x", "y")]);

    let result = LayoutNormalizer::new(&oracle, LayoutSettings::default()).layout(&mut graph);

    assert!(matches!(result, Err(LayoutError::Malformed(_))));
    assert!(graph.nodes().all(|node| node.point == Point::default()));
}

#[test]
fn test_missing_position_is_malformed() {
    let oracle = FixedOracle::new(&[("a", 0.0, 0.0)]);
    let mut graph = graph(&["a", "b"], &[("a", "b")]);

    let result = LayoutNormalizer::new(&oracle, LayoutSettings::default()).layout(&mut graph);
    assert!(matches!(result, Err(LayoutError::Malformed(_))));
}

#[test]
fn test_cancelled_layout() {
    let oracle = RankOracle::default();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut graph = graph(&["a", "b"], &[("a", "b")]);

    let result = LayoutNormalizer::new(&oracle, LayoutSettings::default())
        .with_cancel(cancel)
        .layout(&mut graph);

    assert!(matches!(result, Err(LayoutError::Cancelled)));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_best_fit_actions() {
    let oracle = RankOracle::default();
    let mut graph = graph(&["a", "b", "c"], &[("a", "b"), ("a", "c")]);
    LayoutNormalizer::new(&oracle, LayoutSettings::default())
        .layout(&mut graph)
        .unwrap();
    let laid_out: Vec<Point> = graph.nodes().map(|n| n.point).collect();

    let scrambled: HashMap<NodeId, Point> = graph.nodes().map(|n| (n.id, Point::new(3.0, -2.0))).collect();
    graph.apply_points(&scrambled);
    fit_to_view(&mut graph, 0.1);
    let refitted: Vec<Point> = graph.nodes().map(|n| n.point).collect();
    for (a, b) in laid_out.iter().zip(&refitted) {
        assert!((a.x - b.x).abs() < 1e-12 && (a.y - b.y).abs() < 1e-12);
    }

    graph.apply_points(&scrambled);
    graph.restore_raw_layout();
    assert!(graph.nodes().all(|n| n.point == n.raw_layout_point));
}
