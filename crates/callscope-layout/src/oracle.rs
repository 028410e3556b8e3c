//! Request/response types for an external layered layout service

use callscope_core::Point;
use std::collections::HashMap;
use thiserror::Error;

/// Topology of one connected component, in the order it is fed to the oracle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutRequest {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
}

/// Bounding size of a raw layout, in oracle units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Extent {
    pub width: f64,
    pub height: f64,
}

/// Oracle answer: a position for every requested node, y growing downward.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLayout {
    pub positions: HashMap<String, Point>,
    pub extent: Extent,
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout oracle unavailable: {0}")]
    Unavailable(String),

    #[error("malformed layout output: {0}")]
    Malformed(String),

    #[error("layout cancelled")]
    Cancelled,
}

/// A deterministic graph-drawing service.
pub trait LayoutOracle: Send + Sync {
    fn layout(&self, request: &LayoutRequest) -> Result<RawLayout, LayoutError>;
}
