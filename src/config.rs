//! Configuration for chainstream
//!
//! Centralized configuration with sensible defaults.

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};
use crate::format::MAX_CLUSTER_SIZE;

/// Main configuration for a stream container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Format Configuration
    // -------------------------------------------------------------------------
    /// Data bytes per cluster. Only used when a new container is created;
    /// an existing container always uses the value stored in its header.
    pub cluster_size: u32,

    // -------------------------------------------------------------------------
    // Integrity Configuration
    // -------------------------------------------------------------------------
    /// Validate traits and back-links on every traversal step, and check
    /// descriptor back-references on every directory access.
    ///
    /// Bounds and sentinel checks run regardless of this flag.
    pub integrity_checks: bool,

    // -------------------------------------------------------------------------
    // Traversal Configuration
    // -------------------------------------------------------------------------
    /// Fragment position cache used by opened streams
    pub cache_policy: CachePolicy,

    // -------------------------------------------------------------------------
    // Directory Configuration
    // -------------------------------------------------------------------------
    /// Number of directory records reserved each time the directory grows
    pub directory_growth: u64,
}

/// Fragment → cluster position cache policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Always re-derive positions by walking from the nearest known point
    None,

    /// Remember every position discovered while walking
    Remember,

    /// Walk the whole chain when the stream is opened and remember it
    Scan,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_size: 4096,
            integrity_checks: true,
            cache_policy: CachePolicy::Remember,
            directory_growth: 32,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the values can describe a usable container
    pub fn validate(&self) -> Result<()> {
        if self.cluster_size == 0 || self.cluster_size > MAX_CLUSTER_SIZE {
            return Err(ChainError::Config(format!(
                "cluster_size must be in 1..={}, got {}",
                MAX_CLUSTER_SIZE, self.cluster_size
            )));
        }
        if self.directory_growth == 0 {
            return Err(ChainError::Config(
                "directory_growth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the cluster size (in bytes)
    pub fn cluster_size(mut self, size: u32) -> Self {
        self.config.cluster_size = size;
        self
    }

    /// Enable or disable the expensive integrity checks
    pub fn integrity_checks(mut self, enabled: bool) -> Self {
        self.config.integrity_checks = enabled;
        self
    }

    /// Set the fragment cache policy
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.cache_policy = policy;
        self
    }

    /// Set the directory growth block (in records)
    pub fn directory_growth(mut self, records: u64) -> Self {
        self.config.directory_growth = records;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
