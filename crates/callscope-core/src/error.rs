//! Error types for graph assembly

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// `add_edge` was called before `add_node` for one of its endpoints.
    /// This is an orchestration bug, never a runtime condition.
    #[error("edge endpoint was never added to the graph: {0}")]
    UnknownEndpoint(String),
}
