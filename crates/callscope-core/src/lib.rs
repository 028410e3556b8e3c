//! Callscope Core — call graph data model, dependency cache, and view transform

pub mod cache;
pub mod cancel;
pub mod error;
pub mod graph;
pub mod model;
pub mod view;


#[cfg(test)]
pub mod test_utils;

pub use cache::{CacheStats, Coverage, Dependency, DependencyCache, VersionSource};
pub use cancel::CancelFlag;
pub use error::GraphError;
pub use graph::{Component, Graph};
pub use model::{Edge, EdgeId, FunctionHandle, FunctionRef, Node, NodeId, Point, Viewport};
pub use view::ViewTransform;
