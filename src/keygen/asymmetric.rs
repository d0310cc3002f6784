//! Asymmetric key pair generation

use zeroize::Zeroizing;

use crate::cache::CacheEngine;
use crate::error::{CacheError, CacheResult};
use crate::types::{AsymmetricKeyMode, AsymmetricKeyPair};

/// Pluggable key pair generator seeded from the entropy pool.
///
/// The engine consumes `seed_len(mode)` pool bytes, hands them to
/// `generate`, and zeroizes them afterwards. Implementations must derive
/// the pair deterministically from the seed and must not retain it.
pub trait KeyPairProvider: Send + Sync {
    /// Number of seed bytes the scheme consumes from the pool.
    fn seed_len(&self, mode: AsymmetricKeyMode) -> usize;

    /// Produce a key pair from `seed`, which is exactly `seed_len` bytes.
    fn generate(&self, mode: AsymmetricKeyMode, seed: &[u8]) -> CacheResult<AsymmetricKeyPair>;
}

/// Built-in provider covering classical ECDH.
///
/// X25519 pairs are computed directly from the seed as the clamped scalar.
/// FrodoKEM and Kyber need a full KEM implementation, so this provider
/// rejects them; deployments with a post-quantum library inject their own
/// [`KeyPairProvider`] instead.
#[derive(Debug, Default)]
pub struct DefaultKeyPairProvider;

impl KeyPairProvider for DefaultKeyPairProvider {
    fn seed_len(&self, mode: AsymmetricKeyMode) -> usize {
        match mode {
            AsymmetricKeyMode::Ecdh => 32,
            AsymmetricKeyMode::Frodo => 48,
            AsymmetricKeyMode::Kyber => 64,
        }
    }

    fn generate(&self, mode: AsymmetricKeyMode, seed: &[u8]) -> CacheResult<AsymmetricKeyPair> {
        match mode {
            AsymmetricKeyMode::Ecdh => {
                if seed.len() != 32 {
                    return Err(CacheError::invalid_argument(format!(
                        "X25519 seed must be 32 bytes, got {}",
                        seed.len()
                    )));
                }
                let mut secret = Zeroizing::new([0u8; 32]);
                secret.copy_from_slice(seed);
                let public_key =
                    x25519_dalek::x25519(*secret, x25519_dalek::X25519_BASEPOINT_BYTES);
                Ok(AsymmetricKeyPair {
                    private_key: secret.to_vec(),
                    public_key: public_key.to_vec(),
                })
            }
            AsymmetricKeyMode::Frodo | AsymmetricKeyMode::Kyber => {
                Err(CacheError::invalid_argument(format!(
                    "{} requires an injected key pair provider",
                    mode
                )))
            }
        }
    }
}

/// Generate an asymmetric key pair by consuming a seed from the cache.
///
/// The seed is consumed exactly once and zeroized after the provider runs;
/// ownership of the pair transfers fully to the caller.
pub fn derive_asymmetric(
    engine: &CacheEngine,
    provider: &dyn KeyPairProvider,
    mode: AsymmetricKeyMode,
) -> CacheResult<AsymmetricKeyPair> {
    let seed_len = provider.seed_len(mode);
    if seed_len == 0 {
        return Err(CacheError::invalid_argument(format!(
            "provider reports zero seed length for {}",
            mode
        )));
    }
    let seed = engine.consume(seed_len as u64)?;
    provider.generate(mode, &seed)
}
