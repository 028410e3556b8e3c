//! Layout oracle protocol and post-processing of its output into normalized coordinates

pub mod graphviz;
pub mod normalize;
pub mod oracle;

#[cfg(test)]
pub mod tests;

pub use graphviz::{GraphvizOracle, GraphvizSettings};
pub use normalize::{fit_points, fit_to_view, LayoutNormalizer, LayoutSettings};
pub use oracle::{Extent, LayoutError, LayoutOracle, LayoutRequest, RawLayout};
