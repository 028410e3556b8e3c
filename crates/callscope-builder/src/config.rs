//! `callscope.toml` configuration

use callscope_layout::{GraphvizSettings, LayoutSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "callscope.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Query the functions of one closure round concurrently.
    pub parallel: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        ResolverSettings { parallel: true }
    }
}

/// Every section and field is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallscopeConfig {
    pub layout: LayoutSettings,
    pub graphviz: GraphvizSettings,
    pub resolver: ResolverSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl CallscopeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CallscopeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Load `<root>/callscope.toml` if present, defaults otherwise.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = root.as_ref().join(CONFIG_FILE);
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let layout = &self.layout;
        if !(layout.grid_size > 0.0 && layout.grid_size.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "layout.grid_size must be positive, got {}",
                layout.grid_size
            )));
        }
        if !(0.0..0.5).contains(&layout.inset) {
            return Err(ConfigError::Invalid(format!(
                "layout.inset must be in [0, 0.5), got {}",
                layout.inset
            )));
        }
        if !(layout.precision >= 1.0 && layout.precision.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "layout.precision must be at least 1, got {}",
                layout.precision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_is_default() {
        let config = CallscopeConfig::from_toml_str("").unwrap();
        assert_eq!(config, CallscopeConfig::default());
        assert_eq!(config.layout.grid_size, 0.1);
        assert_eq!(config.layout.precision, 1000.0);
        assert_eq!(config.graphviz.dot_path, PathBuf::from("dot"));
        assert!(config.resolver.parallel);
    }

    #[test]
    fn test_partial_sections() {
        let config = CallscopeConfig::from_toml_str(
            r#"
            [layout]
            inset = 0.05

            [graphviz]
            dot_path = "/opt/graphviz/bin/dot"
            "#,
        )
        .unwrap();

        assert_eq!(config.layout.inset, 0.05);
        assert_eq!(config.layout.grid_size, 0.1);
        assert_eq!(config.graphviz.dot_path, PathBuf::from("/opt/graphviz/bin/dot"));
        assert_eq!(config.graphviz.rank_dir, "LR");
    }

    #[test]
    fn test_invalid_values() {
        let inset = CallscopeConfig::from_toml_str("[layout]\ninset = 0.5\n");
        assert!(matches!(inset, Err(ConfigError::Invalid(_))));

        let grid = CallscopeConfig::from_toml_str("[layout]\ngrid_size = 0.0\n");
        assert!(matches!(grid, Err(ConfigError::Invalid(_))));

        let syntax = CallscopeConfig::from_toml_str("[layout\n");
        assert!(matches!(syntax, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_discover() {
        let dir = TempDir::new().unwrap();
        assert_eq!(CallscopeConfig::discover(dir.path()).unwrap(), CallscopeConfig::default());

        std::fs::write(dir.path().join(CONFIG_FILE), "[resolver]\nparallel = false\n").unwrap();
        let config = CallscopeConfig::discover(dir.path()).unwrap();
        assert!(!config.resolver.parallel);
    }
}
