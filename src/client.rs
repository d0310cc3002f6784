/*!
 * Local key generation client
 *
 * [`LocalKeyClient`] ties the pieces together: it validates the cache
 * configuration, opens the engine over the configured locations, spawns
 * the maintenance scheduler against an entropy source built from the
 * caller's access token, and exposes key generation, status, secret
 * rotation and wipe to the application. Every operation before
 * `initialize_async` fails with `CacheNotReady`.
 */

use std::sync::{Arc, Mutex};

use crate::cache::CacheEngine;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::keygen::{self, DefaultKeyPairProvider, KeyPairProvider};
use crate::maintenance::MaintenanceScheduler;
use crate::source::{EntropySource, SystemEntropySource};
use crate::types::{AsymmetricKeyMode, AsymmetricKeyPair, CacheStatus, SymmetricKeyData, SymmetricKeyMode};

/// Default symmetric key size in bytes when the caller does not pick one.
pub const DEFAULT_KEY_BYTES: u64 = 32;

/// Builds the entropy source at initialization time, credentialed with the
/// caller's access token.
pub type SourceFactory =
    Box<dyn Fn(&str) -> CacheResult<Arc<dyn EntropySource>> + Send + Sync>;

struct ClientInner {
    engine: Arc<CacheEngine>,
    scheduler: MaintenanceScheduler,
}

/// Key generation client backed by the local entropy cache
pub struct LocalKeyClient {
    source_factory: SourceFactory,
    provider: Arc<dyn KeyPairProvider>,
    inner: Mutex<Option<ClientInner>>,
}

impl LocalKeyClient {
    /// Create a client over the operating system entropy source and the
    /// built-in X25519 key pair provider.
    pub fn create() -> Self {
        Self::create_with(
            Box::new(|_token| Ok(Arc::new(SystemEntropySource) as Arc<dyn EntropySource>)),
            Arc::new(DefaultKeyPairProvider),
        )
    }

    /// Create a client with an injected entropy source factory and key
    /// pair provider. The factory runs once per `initialize_async` and
    /// receives the access token.
    pub fn create_with(source_factory: SourceFactory, provider: Arc<dyn KeyPairProvider>) -> Self {
        Self {
            source_factory,
            provider,
            inner: Mutex::new(None),
        }
    }

    /// Initialize the cache and start background maintenance.
    ///
    /// Validates `config`, opens the engine over the configured locations
    /// (restoring any persisted pool), and spawns the scheduler, whose
    /// first tick runs immediately. Returns without waiting for the pool
    /// to fill; poll [`check_cache_status`](Self::check_cache_status) for
    /// readiness. Initializing twice is `InvalidArgument`.
    pub fn initialize_async(&self, token: &str, config: CacheConfig) -> CacheResult<()> {
        config.validate()?;

        let mut inner = self.lock_inner()?;
        if inner.is_some() {
            return Err(CacheError::invalid_argument("client already initialized"));
        }

        let source = (self.source_factory)(token)?;
        let engine = Arc::new(CacheEngine::open(&config)?);
        let scheduler = MaintenanceScheduler::spawn(
            Arc::clone(&engine),
            source,
            config.maintenance_interval,
        )?;

        *inner = Some(ClientInner { engine, scheduler });
        log::info!(
            "key client initialized: {} locations, watermarks {}..{} bytes",
            config.locations.len(),
            config.min_cached_bytes,
            config.max_cached_bytes
        );
        Ok(())
    }

    /// Generate a symmetric key with the default size.
    pub fn gen_symmetric_key(&self, mode: SymmetricKeyMode) -> CacheResult<SymmetricKeyData> {
        self.gen_symmetric_key_with_size(mode, DEFAULT_KEY_BYTES)
    }

    /// Generate a symmetric key of `key_size` bytes.
    ///
    /// `key_size` selects the OTP length; AES-256 keys are always 256 bits
    /// regardless of it.
    pub fn gen_symmetric_key_with_size(
        &self,
        mode: SymmetricKeyMode,
        key_size: u64,
    ) -> CacheResult<SymmetricKeyData> {
        let engine = self.engine()?;
        keygen::derive_symmetric(&engine, mode, key_size)
    }

    /// Generate an asymmetric key pair seeded from the pool.
    pub fn gen_asymmetric_keys(&self, mode: AsymmetricKeyMode) -> CacheResult<AsymmetricKeyPair> {
        let engine = self.engine()?;
        keygen::derive_asymmetric(&engine, self.provider.as_ref(), mode)
    }

    /// Rotate the device secret across every location.
    pub fn update_device_secret(&self, old_secret: &[u8], new_secret: &[u8]) -> CacheResult<()> {
        let engine = self.engine()?;
        engine.update_device_secret(old_secret, new_secret)
    }

    /// Destroy all cached random and reset the cache to downloading. The
    /// scheduler keeps running and refills the pool from scratch.
    pub fn wipe(&self) -> CacheResult<()> {
        let engine = self.engine()?;
        engine.wipe()
    }

    /// Report the cache state and remaining unconsumed capacity.
    pub fn check_cache_status(&self) -> CacheResult<CacheStatus> {
        let engine = self.engine()?;
        engine.status()
    }

    /// Stop background maintenance and release the cache. Idempotent; the
    /// on-disk pool stays sealed in place for the next initialization.
    pub fn shutdown(&self) -> CacheResult<()> {
        let mut inner = self.lock_inner()?;
        if let Some(mut client) = inner.take() {
            client.scheduler.shutdown();
            log::info!("key client shut down");
        }
        Ok(())
    }

    fn engine(&self) -> CacheResult<Arc<CacheEngine>> {
        let inner = self.lock_inner()?;
        match inner.as_ref() {
            Some(client) => Ok(Arc::clone(&client.engine)),
            None => Err(CacheError::not_ready("client not initialized")),
        }
    }

    fn lock_inner(&self) -> CacheResult<std::sync::MutexGuard<'_, Option<ClientInner>>> {
        self.inner
            .lock()
            .map_err(|_| CacheError::system("client state lock poisoned"))
    }
}

impl Drop for LocalKeyClient {
    fn drop(&mut self) {
        // Scheduler Drop joins the thread; nothing else to release.
        let _ = self.shutdown();
    }
}
