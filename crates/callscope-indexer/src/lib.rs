//! Call index oracle, scope descriptors, and transitive closure resolution

pub mod index;
pub mod resolver;
pub mod static_index;


pub use index::{CallIndex, IndexError, Scope};
pub use resolver::{ClosureResolver, Direction, Resolution, ResolveError};
pub use static_index::{FunctionEntry, Manifest, StaticIndex};
