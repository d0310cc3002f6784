/*!
 * randpool: a local, disk-backed entropy cache and key derivation engine
 *
 * The crate maintains a pool of true-random bytes on disk, sealed under a
 * caller-supplied device secret, and derives cryptographic keys from it:
 *
 * - AES-256 keys, expanded from a consumed seed with HKDF-SHA256
 * - One-time-pad keys, raw pool bytes handed out exactly once
 * - Asymmetric key pairs (X25519 built in, post-quantum pluggable)
 *
 * A background maintenance thread keeps the pool between configured
 * watermarks by pulling from an [`EntropySource`](source::EntropySource).
 * Pool bytes are consumed oldest first and never handed out twice, even
 * across process restarts or concurrent callers.
 *
 * The typical entry point is [`LocalKeyClient`]:
 *
 * ```no_run
 * use std::time::Duration;
 * use randpool::prelude::*;
 *
 * fn main() -> Result<(), CacheError> {
 *     let client = LocalKeyClient::create();
 *     client.initialize_async(
 *         "access-token",
 *         CacheConfig {
 *             device_secret: b"device-secret".to_vec(),
 *             locations: vec![LocationConfig::new("main", "/var/lib/randpool", 1 << 20)],
 *             max_cached_bytes: 1 << 20,
 *             min_cached_bytes: 64 * 1024,
 *             maintenance_interval: Duration::from_secs(30),
 *             segment_ttl: None,
 *         },
 *     )?;
 *
 *     while client.check_cache_status()?.state != CacheState::Ready {
 *         std::thread::sleep(Duration::from_millis(100));
 *     }
 *
 *     let key = client.gen_symmetric_key(SymmetricKeyMode::Aes256)?;
 *     assert_eq!(key.key.len(), 32);
 *     Ok(())
 * }
 * ```
 */

/// Disk-backed entropy cache engine
pub mod cache;

/// High-level key generation client
pub mod client;

/// Cache and storage location configuration
pub mod config;

/// Common error types for cache and key derivation operations
pub mod error;

/// Key derivation from cached entropy
pub mod keygen;

/// Storage location selection and quota accounting
pub mod location;

/// Background maintenance scheduler
pub mod maintenance;

/// Entropy source adapters
pub mod source;

/// Sealed on-disk segment and manifest store
pub mod store;

/// Public data types
pub mod types;

/// Utilities shared across the crate
pub mod utils;

// Re-export main types for convenience
pub use cache::CacheEngine;
pub use client::LocalKeyClient;
pub use client::SourceFactory;
pub use config::CacheConfig;
pub use config::LocationConfig;
pub use error::{CacheError, CacheResult};
pub use keygen::DefaultKeyPairProvider;
pub use keygen::KeyPairProvider;
pub use source::EntropySource;
pub use source::SystemEntropySource;
pub use types::AsymmetricKeyMode;
pub use types::AsymmetricKeyPair;
pub use types::CacheState;
pub use types::CacheStatus;
pub use types::SymmetricKeyData;
pub use types::SymmetricKeyMode;

/// Initialize the module.
///
/// No special setup is currently required; this function exists so callers
/// have a stable hook should future backends need one.
pub fn init() -> Result<(), CacheError> {
    Ok(())
}

/// Provides a simplified interface to the most commonly used operations.
pub mod prelude {
    pub use crate::client::LocalKeyClient;
    pub use crate::config::CacheConfig;
    pub use crate::config::LocationConfig;
    pub use crate::error::CacheError;
    pub use crate::error::CacheResult;
    pub use crate::init;
    pub use crate::types::AsymmetricKeyMode;
    pub use crate::types::CacheState;
    pub use crate::types::CacheStatus;
    pub use crate::types::SymmetricKeyMode;
}
