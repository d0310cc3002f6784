/*!
 * Cache configuration
 *
 * The device secret, the set of on-disk locations with their byte quotas,
 * the pool watermarks and the maintenance cadence.
 */

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CacheError, CacheResult};

/// Configuration for one on-disk random location
///
/// Equality is structural over id, path and quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Unique identifier for the location within a cache configuration
    pub id: String,
    /// Directory in which sealed segments and the manifest are stored
    pub path: PathBuf,
    /// Maximum space in bytes to be used for downloaded random
    pub available_size: u64,
}

impl LocationConfig {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, available_size: u64) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            available_size,
        }
    }
}

/// Configuration for the local random cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Device secret gating read/write access to the on-disk pool; owned
    /// exclusively by the caller and zeroed when the config is dropped
    pub device_secret: Vec<u8>,
    /// Ordered list of locations to save downloaded random, non-empty
    pub locations: Vec<LocationConfig>,
    /// Maximum number of usable cached bytes the pool may hold
    pub max_cached_bytes: u64,
    /// Minimum number of usable cached bytes required before the cache
    /// first reports READY
    pub min_cached_bytes: u64,
    /// Time between random download attempts
    pub maintenance_interval: Duration,
    /// Optional time-to-live for downloaded segments; stale segments are
    /// excluded from the usable pool and pruned by maintenance
    pub segment_ttl: Option<Duration>,
}

impl CacheConfig {
    /// Validate the configuration, returning `InvalidArgument` on the first
    /// violated constraint.
    pub fn validate(&self) -> CacheResult<()> {
        if self.device_secret.is_empty() {
            return Err(CacheError::invalid_argument("device secret must not be empty"));
        }
        if self.locations.is_empty() {
            return Err(CacheError::invalid_argument(
                "at least one random location must be configured",
            ));
        }
        for (i, loc) in self.locations.iter().enumerate() {
            if loc.id.is_empty() {
                return Err(CacheError::invalid_argument(format!(
                    "location at index {} has an empty id",
                    i
                )));
            }
            if self.locations[..i].iter().any(|other| other.id == loc.id) {
                return Err(CacheError::invalid_argument(format!(
                    "duplicate location id '{}'",
                    loc.id
                )));
            }
        }
        if self.max_cached_bytes < self.min_cached_bytes {
            return Err(CacheError::invalid_argument(format!(
                "max_cached_bytes ({}) must be >= min_cached_bytes ({})",
                self.max_cached_bytes, self.min_cached_bytes
            )));
        }
        if self.maintenance_interval.is_zero() {
            return Err(CacheError::invalid_argument(
                "maintenance interval must be greater than zero",
            ));
        }
        if let Some(ttl) = self.segment_ttl {
            if ttl.is_zero() {
                return Err(CacheError::invalid_argument(
                    "segment TTL must be greater than zero when configured",
                ));
            }
        }
        let total_quota: u64 = self.locations.iter().map(|l| l.available_size).sum();
        if total_quota < self.max_cached_bytes {
            return Err(CacheError::invalid_argument(format!(
                "sum of location quotas ({}) is below max_cached_bytes ({})",
                total_quota, self.max_cached_bytes
            )));
        }
        Ok(())
    }
}

impl Drop for CacheConfig {
    fn drop(&mut self) {
        self.device_secret.zeroize();
    }
}
