//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default depth guard for cascades and relation traversals.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_depth must be at least 1")]
    ZeroDepth,
}

/// Tunables for the recompute scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Longest cascade chain (and relation traversal inside a compute
    /// function) before the batch fails with a recursion error.
    pub max_depth: usize,

    /// Recompute pairs reached only through other computed fields only if
    /// one of those fields actually changed.
    pub push_pull: bool,

    /// Stage computed writes and apply them only once the whole batch
    /// succeeded.
    pub transactional: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            push_pull: true,
            transactional: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.max_depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        Ok(config)
    }
}
