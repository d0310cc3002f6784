/*!
 * Error Handling for the randpool Entropy Cache
 *
 * Provides the error kinds surfaced by the cache engine, the secret-gated
 * store and the key derivation service, with descriptive messages and
 * convenience constructors.
 */

use thiserror::Error;

/// Comprehensive error type for all cache and key derivation operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Malformed configuration or call arguments (overlapping location ids,
    /// non-positive interval, zero-length OTP key, exhausted quotas, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The cache was queried or consumed before the pool first reached the
    /// minimum watermark, or the client was never initialized
    #[error("cache not ready: {0}")]
    CacheNotReady(String),

    /// Not enough unconsumed random bytes remain, or every segment is past
    /// the configured time-to-live
    #[error("random pool expired: {0}")]
    RandomPoolExpired(String),

    /// No configured location is currently reachable or writable
    #[error("random pool inactive: {0}")]
    RandomPoolInactive(String),

    /// Wrong device secret, or a secret rotation failed
    #[error("device secret failed: {0}")]
    DeviceSecretFailed(String),

    /// A segment checksum or authentication tag did not verify on read
    #[error("data corrupted: {0}")]
    DataCorrupted(String),

    /// Transient failure fetching random from the entropy source; recovered
    /// automatically by the maintenance scheduler
    #[error("cannot download: {0}")]
    CannotDownload(String),

    /// Filesystem or other operating system failure
    #[error("system error: {0}")]
    SystemError(String),

    /// Catch-all for unexpected failures
    #[error("unknown error: {0}")]
    UnknownError(String),
}

impl CacheError {
    /// Get the error category as a stable string, useful for logging
    /// without matching on the full variant.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::InvalidArgument(_) => "InvalidArgument",
            CacheError::CacheNotReady(_) => "CacheNotReady",
            CacheError::RandomPoolExpired(_) => "RandomPoolExpired",
            CacheError::RandomPoolInactive(_) => "RandomPoolInactive",
            CacheError::DeviceSecretFailed(_) => "DeviceSecretFailed",
            CacheError::DataCorrupted(_) => "DataCorrupted",
            CacheError::CannotDownload(_) => "CannotDownload",
            CacheError::SystemError(_) => "SystemError",
            CacheError::UnknownError(_) => "UnknownError",
        }
    }

    /// True for failures the maintenance scheduler retries on the next tick
    /// instead of surfacing to foreground callers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CacheError::CannotDownload(_) | CacheError::SystemError(_)
        )
    }
}

/// Convenience constructors for common error kinds
impl CacheError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        CacheError::CacheNotReady(msg.into())
    }

    pub fn pool_expired(msg: impl Into<String>) -> Self {
        CacheError::RandomPoolExpired(msg.into())
    }

    pub fn pool_inactive(msg: impl Into<String>) -> Self {
        CacheError::RandomPoolInactive(msg.into())
    }

    pub fn device_secret(msg: impl Into<String>) -> Self {
        CacheError::DeviceSecretFailed(msg.into())
    }

    pub fn corrupted(msg: impl Into<String>) -> Self {
        CacheError::DataCorrupted(msg.into())
    }

    pub fn cannot_download(msg: impl Into<String>) -> Self {
        CacheError::CannotDownload(msg.into())
    }

    pub fn system(msg: impl Into<String>) -> Self {
        CacheError::SystemError(msg.into())
    }
}

// From implementations for automatic error conversion
impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::SystemError(format!("IO operation failed: {}", err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::DataCorrupted(format!("manifest encoding failed: {}", err))
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
