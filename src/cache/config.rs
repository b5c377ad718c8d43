//! Query cache configuration, read from the `[cache]` table of `querycache.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_QUERY_RESULT_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Checked before every manager operation.
    pub enabled: bool,
    /// Largest id chunk handed to a single batch load on the slow path.
    pub max_batch_size: usize,
    /// Maximum query results held by the in-memory store.
    pub query_result_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            query_result_limit: DEFAULT_QUERY_RESULT_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_batch_size: settings.max_batch_size,
            query_result_limit: settings.query_result_limit,
        }
    }
}

impl CacheConfig {
    /// Returns the batch size as NonZeroUsize, clamping to 1 if zero.
    pub fn max_batch_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_batch_size).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the result limit as NonZeroUsize, clamping to 1 if zero.
    pub fn query_result_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.query_result_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_batch_size, 1000);
        assert_eq!(config.query_result_limit, 1000);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_batch_size: 0,
            query_result_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.max_batch_size_non_zero().get(), 1);
        assert_eq!(config.query_result_limit_non_zero().get(), 1);
    }

    #[test]
    fn disabled_keeps_other_defaults() {
        let config = CacheConfig::disabled();
        assert!(!config.enabled);
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
    }
}
