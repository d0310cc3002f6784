/*!
 * Entropy source adapter
 *
 * The cache pulls random bytes through this seam. Production deployments
 * implement [`EntropySource`] over their remote entropy service client
 * (credentialed with the access token supplied at initialization); the
 * built-in [`SystemEntropySource`] draws from the operating system
 * generator and is the default for single-machine use and tests.
 */

use rand::{rngs::OsRng, RngCore};

use crate::error::{CacheError, CacheResult};

/// Pull-based source of true-random bytes
///
/// Implementations must be safe to call from the background maintenance
/// thread. A transient inability to serve bytes is reported as
/// [`CacheError::CannotDownload`]; the scheduler logs it and retries on the
/// next tick without disturbing foreground callers.
pub trait EntropySource: Send + Sync {
    /// Fetch exactly `n_bytes` of fresh random material.
    fn fetch(&self, n_bytes: usize) -> CacheResult<Vec<u8>>;

    /// Human-readable source name for log lines.
    fn name(&self) -> &str {
        "entropy-source"
    }
}

/// Entropy source backed by the operating system generator
#[derive(Debug, Default)]
pub struct SystemEntropySource;

impl EntropySource for SystemEntropySource {
    fn fetch(&self, n_bytes: usize) -> CacheResult<Vec<u8>> {
        if n_bytes == 0 {
            return Err(CacheError::invalid_argument(
                "fetch of zero bytes requested",
            ));
        }
        let mut bytes = vec![0u8; n_bytes];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CacheError::cannot_download(format!("OS generator failed: {}", e)))?;
        Ok(bytes)
    }

    fn name(&self) -> &str {
        "system-os-rng"
    }
}
