/*!
 * Location manager
 *
 * Owns the configured set of on-disk locations, tracks how many bytes each
 * one holds, and decides where the next pool segment is placed. Placement
 * fills locations in configured order up to each one's quota; once every
 * quota is exhausted further writes fail with a capacity error, which the
 * cache engine turns into a skipped maintenance cycle.
 */

use std::collections::HashMap;

use crate::config::LocationConfig;
use crate::error::{CacheError, CacheResult};

/// Tracks byte usage per configured location and places new segments
#[derive(Debug)]
pub struct LocationManager {
    locations: Vec<LocationConfig>,
    used: HashMap<String, u64>,
}

impl LocationManager {
    /// Create a manager over the configured locations with zero usage.
    pub fn new(locations: Vec<LocationConfig>) -> Self {
        let used = locations.iter().map(|l| (l.id.clone(), 0)).collect();
        Self { locations, used }
    }

    /// Seed usage counters from segment lengths recovered off disk.
    pub fn restore_usage(&mut self, usage: impl IntoIterator<Item = (String, u64)>) {
        for (id, bytes) in usage {
            if let Some(entry) = self.used.get_mut(&id) {
                *entry += bytes;
            }
        }
    }

    /// Configured locations in placement order.
    pub fn locations(&self) -> &[LocationConfig] {
        &self.locations
    }

    pub fn location(&self, id: &str) -> Option<&LocationConfig> {
        self.locations.iter().find(|l| l.id == id)
    }

    /// Bytes currently stored at a location.
    pub fn capacity_used(&self, id: &str) -> u64 {
        self.used.get(id).copied().unwrap_or(0)
    }

    /// Pick the first location, in configured order, with room for
    /// `n_bytes`. Fails with a capacity error once all quotas are full.
    pub fn select_write_target(&self, n_bytes: u64) -> CacheResult<&LocationConfig> {
        if n_bytes == 0 {
            return Err(CacheError::invalid_argument(
                "cannot place a zero-length segment",
            ));
        }
        self.locations
            .iter()
            .find(|l| self.capacity_used(&l.id) + n_bytes <= l.available_size)
            .ok_or_else(|| {
                CacheError::invalid_argument(format!(
                    "no location has {} bytes of remaining quota",
                    n_bytes
                ))
            })
    }

    /// Largest segment any location could still accept.
    pub fn largest_write_capacity(&self) -> u64 {
        self.locations
            .iter()
            .map(|l| l.available_size.saturating_sub(self.capacity_used(&l.id)))
            .max()
            .unwrap_or(0)
    }

    /// Account for a segment written to `id`.
    pub fn record_write(&mut self, id: &str, n_bytes: u64) {
        *self.used.entry(id.to_string()).or_insert(0) += n_bytes;
    }

    /// Account for a segment removed from `id`.
    pub fn record_remove(&mut self, id: &str, n_bytes: u64) {
        if let Some(entry) = self.used.get_mut(id) {
            *entry = entry.saturating_sub(n_bytes);
        }
    }

    /// Reset all usage counters, e.g. after a wipe.
    pub fn clear(&mut self) {
        for entry in self.used.values_mut() {
            *entry = 0;
        }
    }
}
