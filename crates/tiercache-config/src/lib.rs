//! Configuration system for tiercache regions.
//!
//! Provides TOML-based configuration with:
//! - A `[default]` region table applied to every region
//! - Named `[regions.<name>]` tables that override individual fields
//! - Validation of capacities, budgets and timeouts before a region is built
//!
//! ```toml
//! [default]
//! max_objects = 1000
//! memory_policy = "lru"
//!
//! [default.element]
//! eternal = false
//! max_life_seconds = 3600
//!
//! [regions.sessions]
//! max_objects = 200
//! use_memory_shrinker = true
//! max_memory_idle_time_seconds = 600
//! ```

pub mod error;
pub mod types;

pub use error::{ConfigError, Result};
pub use types::*;

use std::path::Path;

/// Load and validate a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<CacheConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let config = CacheConfig::from_toml(&contents)?;
    config.validate()?;
    Ok(config)
}
