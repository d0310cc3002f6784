//! Symmetric key derivation

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cache::CacheEngine;
use crate::error::{CacheError, CacheResult};
use crate::types::{SymmetricKeyData, SymmetricKeyMode};

/// Seed length consumed from the pool for AES-256 derivation.
const AES_SEED_LEN: u64 = 32;

/// AES-256 key length in bytes.
const AES_KEY_LEN: usize = 32;

/// Domain separator for the AES-256 expansion step.
const AES_KEY_INFO: &[u8] = b"randpool symmetric aes256 v1";

/// Derivation descriptor attached to every symmetric key.
///
/// A cooperating holder of the same pool bytes can replay the derivation
/// from this record. The cache itself never reads it back.
#[derive(Debug, Serialize, Deserialize)]
struct KeyDescriptor {
    mode: String,
    seed_len: u64,
}

/// Derive a symmetric key by consuming entropy from the cache.
///
/// `Aes256` consumes a fixed 32-byte seed and expands it with HKDF-SHA256
/// into a 256-bit key; `key_size` is ignored for that mode. `Otp` consumes
/// exactly `key_size` bytes and returns them unmodified, so the key is
/// information-theoretically independent of every other derivation.
pub fn derive_symmetric(
    engine: &CacheEngine,
    mode: SymmetricKeyMode,
    key_size: u64,
) -> CacheResult<SymmetricKeyData> {
    match mode {
        SymmetricKeyMode::Aes256 => {
            let seed = engine.consume(AES_SEED_LEN)?;
            let key = expand_aes_key(&seed)?;
            Ok(SymmetricKeyData {
                key: key.to_vec(),
                metadata: descriptor(mode, AES_SEED_LEN)?,
            })
        }
        SymmetricKeyMode::Otp => {
            if key_size == 0 {
                return Err(CacheError::invalid_argument(
                    "OTP key size must be non-zero",
                ));
            }
            let seed = engine.consume(key_size)?;
            Ok(SymmetricKeyData {
                key: seed.to_vec(),
                metadata: descriptor(mode, key_size)?,
            })
        }
    }
}

fn expand_aes_key(seed: &[u8]) -> CacheResult<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(None, seed);
    let mut okm = Zeroizing::new(vec![0u8; AES_KEY_LEN]);
    hk.expand(AES_KEY_INFO, &mut okm)
        .map_err(|_| CacheError::system("HKDF expansion failed"))?;
    Ok(okm)
}

fn descriptor(mode: SymmetricKeyMode, seed_len: u64) -> CacheResult<Vec<u8>> {
    let descriptor = KeyDescriptor {
        mode: mode.to_string(),
        seed_len,
    };
    serde_json::to_vec(&descriptor)
        .map_err(|e| CacheError::system(format!("failed to encode key metadata: {}", e)))
}
