use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::cache::CacheEngine;
use crate::config::{CacheConfig, LocationConfig};
use crate::error::{CacheError, CacheResult};
use crate::source::EntropySource;
use crate::types::{AsymmetricKeyMode, AsymmetricKeyPair, SymmetricKeyMode};

const SECRET: &[u8] = b"keygen-test-secret";

/// Deterministic byte stream so derivations are replayable across engines.
#[derive(Default)]
struct CounterSource {
    next: AtomicU64,
}

impl EntropySource for CounterSource {
    fn fetch(&self, n_bytes: usize) -> CacheResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n_bytes);
        while out.len() < n_bytes {
            let value = self.next.fetch_add(1, Ordering::SeqCst);
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.truncate(n_bytes);
        Ok(out)
    }
}

fn ready_engine(dir: &TempDir) -> CacheEngine {
    let config = CacheConfig {
        device_secret: SECRET.to_vec(),
        locations: vec![LocationConfig::new("a", dir.path().join("a"), 4096)],
        max_cached_bytes: 4096,
        min_cached_bytes: 256,
        maintenance_interval: Duration::from_secs(60),
        segment_ttl: None,
    };
    let engine = CacheEngine::open(&config).unwrap();
    engine.maintain(&CounterSource::default()).unwrap();
    engine
}

#[test]
fn test_aes_key_is_256_bits() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);

    let key = derive_symmetric(&engine, SymmetricKeyMode::Aes256, 0).unwrap();
    assert_eq!(key.key.len(), 32);

    let descriptor: serde_json::Value = serde_json::from_slice(&key.metadata).unwrap();
    assert_eq!(descriptor["mode"], "AES-256");
    assert_eq!(descriptor["seed_len"], 32);
}

#[test]
fn test_aes_ignores_key_size() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);

    let before = engine.status().unwrap().remaining_capacity;
    let key = derive_symmetric(&engine, SymmetricKeyMode::Aes256, 1024).unwrap();
    let after = engine.status().unwrap().remaining_capacity;

    assert_eq!(key.key.len(), 32);
    assert_eq!(before - after, 32);
}

#[test]
fn test_aes_expansion_is_deterministic_per_seed() {
    // Two engines fed the same stream hand out the same seeds and so the
    // same derived keys.
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let engine_a = ready_engine(&dir_a);
    let engine_b = ready_engine(&dir_b);

    let key_a = derive_symmetric(&engine_a, SymmetricKeyMode::Aes256, 0).unwrap();
    let key_b = derive_symmetric(&engine_b, SymmetricKeyMode::Aes256, 0).unwrap();
    assert_eq!(key_a.key, key_b.key);
}

#[test]
fn test_otp_returns_raw_pool_bytes() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);

    let key = derive_symmetric(&engine, SymmetricKeyMode::Otp, 100).unwrap();
    assert_eq!(key.key.len(), 100);

    // The pool was filled by the counter stream starting at zero.
    assert_eq!(&key.key[..8], &0u64.to_le_bytes());
}

#[test]
fn test_otp_keys_are_disjoint() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);

    let first = derive_symmetric(&engine, SymmetricKeyMode::Otp, 64).unwrap();
    let second = derive_symmetric(&engine, SymmetricKeyMode::Otp, 64).unwrap();
    assert_ne!(first.key, second.key);
}

#[test]
fn test_otp_zero_size_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);

    let err = derive_symmetric(&engine, SymmetricKeyMode::Otp, 0).unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgument(_)));
}

#[test]
fn test_derivation_fails_when_pool_cannot_cover_seed() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);

    let err = derive_symmetric(&engine, SymmetricKeyMode::Otp, 1 << 20).unwrap_err();
    assert!(matches!(err, CacheError::RandomPoolExpired(_)));
}

#[test]
fn test_x25519_pair_matches_seed() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);
    let provider = DefaultKeyPairProvider;

    let before = engine.status().unwrap().remaining_capacity;
    let pair = derive_asymmetric(&engine, &provider, AsymmetricKeyMode::Ecdh).unwrap();
    let after = engine.status().unwrap().remaining_capacity;

    assert_eq!(before - after, 32);
    assert_eq!(pair.private_key.len(), 32);
    assert_eq!(pair.public_key.len(), 32);

    let mut seed = [0u8; 32];
    seed.copy_from_slice(&pair.private_key);
    let expected = x25519_dalek::x25519(seed, x25519_dalek::X25519_BASEPOINT_BYTES);
    assert_eq!(pair.public_key, expected.to_vec());
}

#[test]
fn test_default_provider_rejects_pq_modes() {
    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);
    let provider = DefaultKeyPairProvider;

    for mode in [AsymmetricKeyMode::Frodo, AsymmetricKeyMode::Kyber] {
        let err = derive_asymmetric(&engine, &provider, mode).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }
}

#[test]
fn test_injected_provider_receives_mode_seed_len() {
    struct FixedProvider;

    impl KeyPairProvider for FixedProvider {
        fn seed_len(&self, mode: AsymmetricKeyMode) -> usize {
            match mode {
                AsymmetricKeyMode::Ecdh => 32,
                AsymmetricKeyMode::Frodo => 48,
                AsymmetricKeyMode::Kyber => 64,
            }
        }

        fn generate(
            &self,
            _mode: AsymmetricKeyMode,
            seed: &[u8],
        ) -> CacheResult<AsymmetricKeyPair> {
            Ok(AsymmetricKeyPair {
                private_key: seed.to_vec(),
                public_key: vec![0u8; 8],
            })
        }
    }

    let dir = TempDir::new().unwrap();
    let engine = ready_engine(&dir);

    let pair = derive_asymmetric(&engine, &FixedProvider, AsymmetricKeyMode::Kyber).unwrap();
    assert_eq!(pair.private_key.len(), 64);
}
