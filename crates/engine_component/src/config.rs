//! Tuning knobs for pooling and columnar storage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`ComponentPool`](crate::ComponentPool) and
/// [`PoolManager`](crate::PoolManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Instances above this many are dropped on release.
    pub max_size: usize,
    /// `shrink` stops at this many pooled instances.
    pub min_size: usize,
    /// Minimum time between two maintenance passes of the manager.
    pub update_interval: Duration,
    /// A pool untouched for longer than this is shrunk by maintenance.
    pub inactive_threshold: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            min_size: 10,
            update_interval: Duration::from_secs(60),
            inactive_threshold: Duration::from_secs(120),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    #[must_use]
    pub fn with_inactive_threshold(mut self, threshold: Duration) -> Self {
        self.inactive_threshold = threshold;
        self
    }
}

/// Configuration for [`ColumnarStorage`](crate::ColumnarStorage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Slots allocated up front by each columnar storage.
    pub initial_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.min_size, 10);
        assert_eq!(config.update_interval, Duration::from_secs(60));
        assert_eq!(config.inactive_threshold, Duration::from_secs(120));
    }

    #[test]
    fn test_builders() {
        let pool = PoolConfig::default().with_max_size(4).with_min_size(1);
        assert_eq!((pool.max_size, pool.min_size), (4, 1));
        assert_eq!(StorageConfig::default().with_initial_capacity(2).initial_capacity, 2);
    }

    #[test]
    fn test_config_from_json() {
        let config: StorageConfig = serde_json::from_str(r#"{"initial_capacity": 64}"#).unwrap();
        assert_eq!(config.initial_capacity, 64);
    }
}
