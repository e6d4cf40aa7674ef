//! Configuration for the pools and the hash set.
//!
//! Every section is optional in the serialized form; missing fields take their
//! defaults. The ring queue has no tunables beyond its capacity, which callers
//! pass directly.

use serde::{Deserialize, Serialize};

use crate::alloc::page::PageBacking;

/// Default number of elements per [`FixedBlockPool`](crate::alloc::FixedBlockPool) slab.
pub const DEFAULT_SLAB_LEN: usize = 64;

/// Default maximum load factor of a [`RobinHoodSet`](crate::collections::RobinHoodSet).
pub const DEFAULT_LOAD_FACTOR: f64 = 0.8;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Single-threaded pool settings.
    pub fixed_pool: FixedPoolConfig,
    /// Multi-threaded pool settings.
    pub concurrent_pool: ConcurrentPoolConfig,
    /// Hash set settings.
    pub robin_hood: RobinHoodConfig,
}

impl CoreConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed JSON and the matching
    /// validation error for out-of-range values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section.
    ///
    /// # Errors
    /// Returns the first out-of-range value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fixed_pool.validate()?;
        self.concurrent_pool.validate()?;
        self.robin_hood.validate()
    }
}

/// Settings for [`FixedBlockPool`](crate::alloc::FixedBlockPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixedPoolConfig {
    /// Elements carved out of each slab.
    pub slab_len: usize,
}

impl Default for FixedPoolConfig {
    fn default() -> Self {
        Self { slab_len: DEFAULT_SLAB_LEN }
    }
}

impl FixedPoolConfig {
    /// # Errors
    /// Rejects a zero slab length.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slab_len == 0 {
            return Err(ConfigError::InvalidSlabLen(self.slab_len));
        }
        Ok(())
    }
}

/// Settings for [`ConcurrentBlockPool`](crate::alloc::ConcurrentBlockPool).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrentPoolConfig {
    /// Where pages come from.
    pub backing: PageBacking,
    /// Upper bound on pages one pool may own; `None` is unbounded.
    pub max_pages: Option<usize>,
}

impl ConcurrentPoolConfig {
    /// # Errors
    /// Rejects a page limit of zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages == Some(0) {
            return Err(ConfigError::InvalidCapacity(0));
        }
        Ok(())
    }
}

/// Settings for [`RobinHoodSet`](crate::collections::RobinHoodSet).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobinHoodConfig {
    /// Buckets allocated up front (rounded up to a power of two); zero defers
    /// allocation to the first insert.
    pub initial_capacity: usize,
    /// Fraction of buckets that may be occupied before the table doubles.
    pub load_factor: f64,
}

impl Default for RobinHoodConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
        }
    }
}

impl RobinHoodConfig {
    /// # Errors
    /// Rejects load factors outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(ConfigError::InvalidLoadFactor(self.load_factor));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// The document was not valid JSON for [`CoreConfig`].
    Parse(serde_json::Error),
    /// Load factor outside `(0, 1]`.
    InvalidLoadFactor(f64),
    /// Slab length of zero.
    InvalidSlabLen(usize),
    /// A capacity or limit that cannot hold anything.
    InvalidCapacity(usize),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Parse(err) => write!(f, "invalid configuration: {err}"),
            ConfigError::InvalidLoadFactor(lf) => {
                write!(f, "load factor {lf} is outside (0, 1]")
            }
            ConfigError::InvalidSlabLen(len) => write!(f, "slab length {len} must be non-zero"),
            ConfigError::InvalidCapacity(cap) => write!(f, "capacity {cap} must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(err) => Some(err),
            _ => None,
        }
    }
}
