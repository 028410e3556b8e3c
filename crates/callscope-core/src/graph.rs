//! Call graph wrapper around petgraph::DiGraph with function-derived ids

use crate::error::GraphError;
use crate::model::*;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

/// A maximal set of nodes connected when edges are treated as undirected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Node ids in discovery order.
    pub nodes: Vec<NodeId>,
    /// Every edge whose endpoints lie in this component.
    pub edges: Vec<EdgeId>,
}

impl Component {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }
}

/// The call graph: one node per function, at most one edge per ordered pair.
#[derive(Clone)]
pub struct Graph<F> {
    inner: DiGraph<Node<F>, Edge>,
    nodes_by_id: HashMap<NodeId, NodeIndex>,
    edges_by_id: HashMap<EdgeId, EdgeIndex>,
    components: OnceLock<Vec<Component>>,
}

impl<F> std::fmt::Debug for Graph<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl<F: FunctionHandle> Graph<F> {
    pub fn new() -> Self {
        Graph {
            inner: DiGraph::new(),
            nodes_by_id: HashMap::new(),
            edges_by_id: HashMap::new(),
            components: OnceLock::new(),
        }
    }

    /// Add a node for `function` if it is not present yet. Returns its id.
    pub fn add_node(&mut self, function: F) -> NodeId {
        let id = NodeId::of(&function);
        if !self.nodes_by_id.contains_key(&id) {
            let idx = self.inner.add_node(Node::new(function));
            self.nodes_by_id.insert(id, idx);
            self.components = OnceLock::new();
        }
        id
    }

    /// Add the caller → callee edge. Both endpoints must already be nodes.
    pub fn add_edge(&mut self, source: &F, target: &F) -> Result<EdgeId, GraphError> {
        let source_idx = self.index_of(source)?;
        let target_idx = self.index_of(target)?;
        Ok(self.insert_edge(source_idx, target_idx))
    }

    fn index_of(&self, function: &F) -> Result<NodeIndex, GraphError> {
        self.nodes_by_id
            .get(&NodeId::of(function))
            .copied()
            .ok_or_else(|| GraphError::UnknownEndpoint(format!("{:?}", function)))
    }

    fn insert_edge(&mut self, source_idx: NodeIndex, target_idx: NodeIndex) -> EdgeId {
        let edge = Edge::new(self.inner[source_idx].id, self.inner[target_idx].id);
        if !self.edges_by_id.contains_key(&edge.id) {
            let idx = self.inner.add_edge(source_idx, target_idx, edge);
            self.edges_by_id.insert(edge.id, idx);
            self.components = OnceLock::new();
        }
        edge.id
    }

    /// Get a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&Node<F>> {
        self.nodes_by_id
            .get(&id)
            .and_then(|&idx| self.inner.node_weight(idx))
    }

    /// Get a mutable node by ID.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<F>> {
        let idx = *self.nodes_by_id.get(&id)?;
        self.inner.node_weight_mut(idx)
    }

    /// Get the node of a function, if it was added.
    pub fn node_of(&self, function: &F) -> Option<&Node<F>> {
        self.node(NodeId::of(function))
    }

    pub fn contains(&self, function: &F) -> bool {
        self.nodes_by_id.contains_key(&NodeId::of(function))
    }

    /// Get an edge by ID.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges_by_id
            .get(&id)
            .and_then(|&idx| self.inner.edge_weight(idx))
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// Iterate over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<F>> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    /// Iterate over all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.inner
            .edge_indices()
            .filter_map(move |idx| self.inner.edge_weight(idx))
    }

    /// Edges leaving `id`, self-loops included.
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.directed(id, Direction::Outgoing)
    }

    /// Edges entering `id`, self-loops included.
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.directed(id, Direction::Incoming)
    }

    fn directed(&self, id: NodeId, direction: Direction) -> impl Iterator<Item = &Edge> {
        self.nodes_by_id
            .get(&id)
            .into_iter()
            .flat_map(move |&idx| self.inner.edges_directed(idx, direction))
            .map(|edge_ref| edge_ref.weight())
    }

    /// Edges from callers of `id`. Self-loops are not upstream.
    pub fn upstream_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.incoming(id).filter(|e| !e.is_self_loop())
    }

    /// Edges to callees of `id`. Self-loops are not downstream.
    pub fn downstream_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.outgoing(id).filter(|e| !e.is_self_loop())
    }

    /// All recursive (self-calling) edges.
    pub fn self_loops(&self) -> impl Iterator<Item = &Edge> {
        self.edges().filter(|e| e.is_self_loop())
    }

    /// Connected components, computed on first call and memoized.
    pub fn connected_components(&self) -> &[Component] {
        self.components.get_or_init(|| self.compute_components())
    }

    fn compute_components(&self) -> Vec<Component> {
        let mut membership: HashMap<NodeIndex, usize> = HashMap::new();
        let mut components: Vec<Component> = Vec::new();

        for start in self.inner.node_indices() {
            if membership.contains_key(&start) {
                continue;
            }
            let component_idx = components.len();
            let mut nodes = Vec::new();
            let mut queue = VecDeque::from([start]);
            membership.insert(start, component_idx);

            while let Some(current) = queue.pop_front() {
                nodes.push(self.inner[current].id);
                for neighbor in self.inner.neighbors_undirected(current) {
                    if !membership.contains_key(&neighbor) {
                        membership.insert(neighbor, component_idx);
                        queue.push_back(neighbor);
                    }
                }
            }

            components.push(Component {
                nodes,
                edges: Vec::new(),
            });
        }

        for edge_ref in self.inner.edge_references() {
            if let Some(&component_idx) = membership.get(&edge_ref.source()) {
                components[component_idx].edges.push(edge_ref.weight().id);
            }
        }

        tracing::debug!(
            "Found {} connected components in {} nodes",
            components.len(),
            self.inner.node_count()
        );
        components
    }

    /// Build the subgraph induced by a component of this graph.
    pub fn restrict(&self, component: &Component) -> Graph<F> {
        let mut sub = Graph::new();
        for &id in &component.nodes {
            if let Some(node) = self.node(id) {
                let sub_id = sub.add_node(node.function.clone());
                if let Some(sub_node) = sub.node_mut(sub_id) {
                    sub_node.point = node.point;
                    sub_node.raw_layout_point = node.raw_layout_point;
                }
            }
        }
        for &edge_id in &component.edges {
            let endpoints = (
                sub.nodes_by_id.get(&edge_id.source).copied(),
                sub.nodes_by_id.get(&edge_id.target).copied(),
            );
            if let (Some(source_idx), Some(target_idx)) = endpoints {
                sub.insert_edge(source_idx, target_idx);
            }
        }
        sub
    }

    /// Store a fresh layout: both the live and the raw point of every listed node.
    pub fn apply_layout(&mut self, points: &HashMap<NodeId, Point>) {
        for (id, point) in points {
            if let Some(node) = self.node_mut(*id) {
                node.point = *point;
                node.raw_layout_point = *point;
            }
        }
    }

    /// Move the live points only; raw layout points are kept.
    pub fn apply_points(&mut self, points: &HashMap<NodeId, Point>) {
        for (id, point) in points {
            if let Some(node) = self.node_mut(*id) {
                node.point = *point;
            }
        }
    }

    /// Reset every live point to the last layout result.
    pub fn restore_raw_layout(&mut self) {
        for node in self.inner.node_weights_mut() {
            node.point = node.raw_layout_point;
        }
    }
}

impl<F: FunctionHandle> Default for Graph<F> {
    fn default() -> Self {
        Self::new()
    }
}
