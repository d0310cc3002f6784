use std::sync::{Mutex, TryLockError};
use std::time::Duration;

use chrono::Utc;
use zeroize::Zeroizing;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::location::LocationManager;
use crate::source::EntropySource;
use crate::store::{SecretStore, SegmentMeta};
use crate::types::{CacheState, CacheStatus};

/// Default sealed segment size written by one maintenance chunk
pub const DEFAULT_SEGMENT_BYTES: u64 = 64 * 1024;

struct EngineState {
    store: SecretStore,
    locations: LocationManager,
}

/// The pool state machine and its single mutual-exclusion lock
///
/// Foreground `consume` calls and background maintenance writes both mutate
/// the segment list and consumption offsets; every such mutation happens
/// under `inner`, which is what guarantees that no two callers are ever
/// handed overlapping bytes. Maintenance uses `try_lock` and skips its tick
/// on contention, and releases the lock while a source fetch is in flight,
/// so foreground callers never wait on the scheduler or its network I/O.
pub struct CacheEngine {
    min_cached_bytes: u64,
    max_cached_bytes: u64,
    segment_ttl: Option<Duration>,
    inner: Mutex<EngineState>,
}

impl CacheEngine {
    /// Validate the configuration and open the pool at its locations.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let store = SecretStore::open(config.locations.clone(), &config.device_secret)?;
        let mut locations = LocationManager::new(config.locations.clone());
        locations.restore_usage(store.capacity_usage());

        Ok(Self {
            min_cached_bytes: config.min_cached_bytes,
            max_cached_bytes: config.max_cached_bytes,
            segment_ttl: config.segment_ttl,
            inner: Mutex::new(EngineState { store, locations }),
        })
    }

    /// Side-effect-free diagnostic probe.
    ///
    /// Recomputes the live remaining capacity, re-validates that at least
    /// one location is reachable (`RandomPoolInactive` otherwise) and that
    /// the pool is not entirely stale (`RandomPoolExpired` when a TTL is
    /// configured and every segment is past it).
    pub fn status(&self) -> CacheResult<CacheStatus> {
        let state = self.lock()?;

        if state.store.usable_locations() == 0 {
            return Err(CacheError::pool_inactive(
                "no configured location is reachable and writable",
            ));
        }

        let segments = state.store.segments();
        if let Some(ttl) = self.segment_ttl {
            if !segments.is_empty() && segments.iter().all(|s| is_expired(s, ttl)) {
                return Err(CacheError::pool_expired(
                    "every cached segment is past its time-to-live",
                ));
            }
        }

        Ok(CacheStatus {
            state: if state.store.ready_attained() {
                CacheState::Ready
            } else {
                CacheState::Downloading
            },
            remaining_capacity: self.live_remaining(&segments),
            total_downloaded_random: state.store.total_downloaded(),
        })
    }

    /// Atomically reserve and mark `n_bytes` of cached random, oldest
    /// segment first, and return them.
    ///
    /// The advanced consumption offsets are persisted before the bytes are
    /// returned, so a byte handed out here is never handed out again, even
    /// across a crash or restart. All segments involved are read and
    /// integrity-checked before any offset moves, keeping the call
    /// all-or-nothing from the caller's perspective.
    pub fn consume(&self, n_bytes: u64) -> CacheResult<Zeroizing<Vec<u8>>> {
        if n_bytes == 0 {
            return Err(CacheError::invalid_argument("cannot consume zero bytes"));
        }

        let mut state = self.lock()?;
        if !state.store.ready_attained() {
            return Err(CacheError::not_ready(
                "the pool has not reached its minimum watermark yet",
            ));
        }

        let live = self.live_segments(&state.store);
        let remaining: u64 = live.iter().map(|s| s.remaining()).sum();
        if remaining < n_bytes {
            return Err(CacheError::pool_expired(format!(
                "requested {} bytes but only {} unconsumed bytes remain",
                n_bytes, remaining
            )));
        }

        // Read and verify every segment in the plan before marking anything
        let mut plan: Vec<(String, u64, Zeroizing<Vec<u8>>)> = Vec::new();
        let mut still_needed = n_bytes;
        for meta in &live {
            if still_needed == 0 {
                break;
            }
            let take = meta.remaining().min(still_needed);
            let plaintext = state.store.read_segment(meta)?;
            let start = meta.consumed as usize;
            let end = (meta.consumed + take) as usize;
            let slice = Zeroizing::new(plaintext[start..end].to_vec());
            plan.push((meta.id.clone(), take, slice));
            still_needed -= take;
        }

        let mut out = Zeroizing::new(Vec::with_capacity(n_bytes as usize));
        for (segment_id, take, slice) in plan {
            let update = state.store.advance_consumed(&segment_id, take)?;
            if update.removed {
                state.locations.record_remove(&update.location_id, update.len);
            }
            out.extend_from_slice(&slice);
        }

        log::debug!("consumed {} bytes from the random pool", n_bytes);
        Ok(out)
    }

    /// Delete all segments and metadata at every configured location and
    /// reset the state machine to DOWNLOADING. Idempotent; holding the
    /// engine lock quiesces the scheduler for the duration, so no segment
    /// is deleted mid-write.
    pub fn wipe(&self) -> CacheResult<()> {
        let mut state = self.lock()?;
        state.store.wipe()?;
        state.locations.clear();
        log::info!("random pool wiped, cache reset to downloading");
        Ok(())
    }

    /// Rotate the device secret. Excludes the scheduler and any in-flight
    /// consume for its duration; on failure the pool remains readable
    /// under the old secret.
    pub fn update_device_secret(&self, old_secret: &[u8], new_secret: &[u8]) -> CacheResult<()> {
        let mut state = self.lock()?;
        state.store.rekey(old_secret, new_secret)?;
        log::info!("device secret rotated across all locations");
        Ok(())
    }

    /// One maintenance tick: prune stale segments, then top the pool up to
    /// the maximum watermark from the entropy source, chunked to respect
    /// per-location quotas.
    ///
    /// Skips silently when the engine lock is contended; maintenance backs
    /// off rather than blocking foreground callers. The lock is released
    /// while a fetch is in flight, so consume and status calls never wait
    /// on source I/O; the deficit and write target are re-checked once the
    /// bytes arrive. A `CannotDownload` from the source aborts the tick
    /// (already written chunks are kept) and is retried on the next
    /// interval.
    pub fn maintain(&self, source: &dyn EntropySource) -> CacheResult<()> {
        {
            let mut state = match self.inner.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => {
                    log::debug!("maintenance tick skipped, engine busy");
                    return Ok(());
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(CacheError::system("cache engine lock poisoned"));
                }
            };

            self.prune_expired(&mut state)?;

            let remaining = self.live_remaining(&state.store.segments());
            log::debug!(
                "maintenance tick: remaining {} bytes, deficit {} bytes",
                remaining,
                self.max_cached_bytes.saturating_sub(remaining)
            );
        }

        // A tick never downloads more than one full pool
        let mut fetched_this_tick = 0u64;

        loop {
            // Plan one chunk under the lock, then release it for the fetch
            let chunk = {
                let state = self.lock()?;
                let remaining = self.live_remaining(&state.store.segments());
                let deficit = self.max_cached_bytes.saturating_sub(remaining);
                if deficit == 0 || fetched_this_tick >= self.max_cached_bytes {
                    break;
                }
                let headroom = state.locations.largest_write_capacity();
                if headroom == 0 {
                    log::warn!("all location quotas exhausted, skipping replenishment");
                    break;
                }
                deficit.min(DEFAULT_SEGMENT_BYTES).min(headroom)
            };

            let bytes = source.fetch(chunk as usize).map_err(|e| {
                CacheError::cannot_download(format!(
                    "entropy source '{}' failed: {}",
                    source.name(),
                    e
                ))
            })?;
            if bytes.len() as u64 != chunk {
                return Err(CacheError::cannot_download(format!(
                    "entropy source '{}' returned {} bytes, expected {}",
                    source.name(),
                    bytes.len(),
                    chunk
                )));
            }
            fetched_this_tick += chunk;

            // The pool may have changed while the fetch was in flight
            let mut state = self.lock()?;
            if self.live_remaining(&state.store.segments()) >= self.max_cached_bytes {
                break;
            }
            let target = match state.locations.select_write_target(chunk) {
                Ok(location) => location.id.clone(),
                Err(_) => {
                    log::warn!("location quotas filled during a fetch, dropping chunk");
                    break;
                }
            };
            state.store.write_segment(&target, &bytes)?;
            state.locations.record_write(&target, chunk);
        }

        let mut state = self.lock()?;
        let remaining = self.live_remaining(&state.store.segments());
        if remaining >= self.min_cached_bytes && !state.store.ready_attained() {
            state.store.mark_ready_attained()?;
            log::info!(
                "random pool ready: {} usable bytes cached (minimum {})",
                remaining,
                self.min_cached_bytes
            );
        }
        Ok(())
    }

    /// True once the pool first reached the minimum watermark.
    pub fn is_ready(&self) -> bool {
        self.inner
            .lock()
            .map(|state| state.store.ready_attained())
            .unwrap_or(false)
    }

    fn prune_expired(&self, state: &mut EngineState) -> CacheResult<()> {
        let Some(ttl) = self.segment_ttl else {
            return Ok(());
        };
        let stale: Vec<SegmentMeta> = state
            .store
            .segments()
            .into_iter()
            .filter(|s| is_expired(s, ttl))
            .collect();
        for meta in stale {
            log::info!("pruning stale segment '{}' ({} bytes)", meta.id, meta.len);
            let update = state.store.remove_segment(&meta.id)?;
            state.locations.record_remove(&update.location_id, update.len);
        }
        Ok(())
    }

    /// Unexpired segments with unconsumed bytes, oldest first.
    fn live_segments(&self, store: &SecretStore) -> Vec<SegmentMeta> {
        store
            .segments()
            .into_iter()
            .filter(|s| s.remaining() > 0)
            .filter(|s| match self.segment_ttl {
                Some(ttl) => !is_expired(s, ttl),
                None => true,
            })
            .collect()
    }

    fn live_remaining(&self, segments: &[SegmentMeta]) -> u64 {
        segments
            .iter()
            .filter(|s| match self.segment_ttl {
                Some(ttl) => !is_expired(s, ttl),
                None => true,
            })
            .map(|s| s.remaining())
            .sum()
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, EngineState>> {
        self.inner
            .lock()
            .map_err(|_| CacheError::system("cache engine lock poisoned"))
    }
}

fn is_expired(segment: &SegmentMeta, ttl: Duration) -> bool {
    let age = Utc::now().signed_duration_since(segment.created_at);
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => age > ttl,
        Err(_) => false,
    }
}
