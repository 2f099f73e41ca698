//! Construction-time configuration for the cache tiers.
//!
//! Both config types deserialize from JSON with every field optional, so a partial
//! document only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default LRU capacity trigger
pub const DEFAULT_LRU_MAX_SIZE: usize = 1000;

/// Default fraction of capacity kept after a prune pass
pub const DEFAULT_LRU_FACTOR: f64 = 0.8;

/// LRU cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LruConfig {
    /// Pruning starts once more than this many keys are tracked
    pub max_size: usize,
    /// Fraction of `max_size` retained after pruning, in (0, 1]
    pub factor: f64,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_LRU_MAX_SIZE,
            factor: DEFAULT_LRU_FACTOR,
        }
    }
}

impl LruConfig {
    pub fn new(max_size: usize, factor: f64) -> Result<Self> {
        let config = Self { max_size, factor };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_size(max_size: usize) -> Result<Self> {
        Self::new(max_size, DEFAULT_LRU_FACTOR)
    }

    /// Number of keys left after a prune pass: `floor(max_size * factor)`.
    pub fn retained(&self) -> usize {
        (self.max_size as f64 * self.factor).floor() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::InvalidConfig("LRU max_size must be at least 1".into()));
        }
        if !(self.factor > 0.0 && self.factor <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "LRU factor must be in (0, 1], got {}",
                self.factor
            )));
        }
        if self.retained() == 0 {
            return Err(Error::InvalidConfig(format!(
                "LRU max_size {} with factor {} would prune to zero entries",
                self.max_size, self.factor
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// File-backed cache configuration
///
/// `compress` and `timestamp` only apply when a new log file is created; an existing file
/// keeps the flags stored in its header. `max_age_secs` applies on every open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCacheConfig {
    /// Compress each key and value payload before storage
    pub compress: bool,
    /// Prepend a write timestamp to every record and enable expiry checks
    pub timestamp: bool,
    /// Records older than this are treated as absent. Zero or negative disables expiry.
    pub max_age_secs: i64,
    /// Call `fsync` after every append before updating the index
    pub sync_on_write: bool,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            compress: false,
            timestamp: false,
            max_age_secs: -1,
            sync_on_write: false,
        }
    }
}

impl FileCacheConfig {
    pub fn compressed() -> Self {
        Self {
            compress: true,
            ..Self::default()
        }
    }

    /// Timestamped records that expire after `max_age`, rounded up to whole seconds.
    /// A zero duration disables expiry.
    pub fn expiring(max_age: Duration) -> Self {
        let secs = max_age
            .as_secs()
            .saturating_add(u64::from(max_age.subsec_nanos() > 0));
        Self {
            timestamp: true,
            max_age_secs: i64::try_from(secs).unwrap_or(i64::MAX),
            ..Self::default()
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs as u64))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}
