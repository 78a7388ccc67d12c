//! Engine configuration
//!
//! Loaded from TOML; every field is optional and falls back to its default.
//!
//! ```toml
//! condition_cache_capacity = 1024
//! max_expression_length = 4096
//! max_expression_depth = 32
//! evaluation_fuel = 10000
//! ```

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Limits and cache sizing for condition evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    /// Compiled expressions kept in the LRU cache (0 disables caching)
    #[validate(range(max = 1_000_000))]
    pub condition_cache_capacity: usize,

    /// Longest accepted condition source, in bytes
    #[validate(range(min = 1, max = 1_048_576))]
    pub max_expression_length: usize,

    /// Deepest accepted expression nesting
    #[validate(range(min = 1, max = 256))]
    pub max_expression_depth: usize,

    /// Evaluation steps allowed per condition
    #[validate(range(min = 1))]
    pub evaluation_fuel: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            condition_cache_capacity: 1024,
            max_expression_length: 4096,
            max_expression_depth: 32,
            evaluation_fuel: 10_000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(toml)?;
        config.check()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(
            "Loaded engine config from {}: cache={}, max_length={}, max_depth={}, fuel={}",
            path.display(),
            config.condition_cache_capacity,
            config.max_expression_length,
            config.max_expression_depth,
            config.evaluation_fuel
        );
        Ok(config)
    }

    /// Run field validation, mapping failures to [`AuthzError::Config`]
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AuthzError::Config(e.to_string()))
    }
}
