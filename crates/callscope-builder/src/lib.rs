//! Resolve, assemble, and lay out call graphs one build at a time

pub mod builder;
pub mod config;


pub use builder::{assemble, BuildError, BuildEvent, BuildRequest, GraphBuilder};
pub use config::{CallscopeConfig, ConfigError, ResolverSettings, CONFIG_FILE};
