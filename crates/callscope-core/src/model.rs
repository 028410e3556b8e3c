//! Core data structures for the call graph

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An opaque handle to a callable unit, supplied by the external index.
///
/// The graph never constructs these; it only compares, hashes and orders them.
pub trait FunctionHandle: Clone + Eq + Ord + Hash + fmt::Debug + Send + Sync {
    /// Short human-readable name. Nodes are sorted by it before layout.
    fn display_name(&self) -> &str;

    /// Source file that owns the function. Freshness is tracked per file.
    fn source_file(&self) -> &Path;
}

/// The concrete function handle used by the bundled index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionRef {
    pub qualified_name: String,
    pub name: String,
    pub file_path: PathBuf,
    pub line: Option<u32>,
}

impl FunctionRef {
    pub fn new(
        qualified_name: impl Into<String>,
        name: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        FunctionRef {
            qualified_name: qualified_name.into(),
            name: name.into(),
            file_path: file_path.into(),
            line: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

impl FunctionHandle for FunctionRef {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn source_file(&self) -> &Path {
        &self.file_path
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} ({}:{})", self.qualified_name, self.file_path.display(), line),
            None => write!(f, "{} ({})", self.qualified_name, self.file_path.display()),
        }
    }
}

/// Stable node identifier, derived from the function's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Hash the function handle. Deterministic within one run.
    pub fn of<F: Hash>(function: &F) -> Self {
        let mut hasher = DefaultHasher::new();
        function.hash(&mut hasher);
        NodeId(hasher.finish())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{:016x}", self.0)
    }
}

/// Edge identifier: the ordered pair of endpoint ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    pub source: NodeId,
    pub target: NodeId,
}

impl EdgeId {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        EdgeId { source, target }
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

/// A 2-D coordinate. Normalized graph space uses the unit square.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Device-space size of the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub const fn new(width: f64, height: f64) -> Self {
        Viewport { width, height }
    }
}

/// One node per distinct function in a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<F> {
    pub id: NodeId,
    pub function: F,
    /// Current normalized coordinate; changed by best-fit actions.
    pub point: Point,
    /// Coordinate produced by the last layout run.
    pub raw_layout_point: Point,
}

impl<F: FunctionHandle> Node<F> {
    pub fn new(function: F) -> Self {
        Node {
            id: NodeId::of(&function),
            function,
            point: Point::default(),
            raw_layout_point: Point::default(),
        }
    }
}

/// A directed caller → callee edge. Parallel calls collapse into one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Edge {
            id: EdgeId::new(source, target),
            source,
            target,
        }
    }

    /// A function calling itself.
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}
