use rand::{rngs::OsRng, RngCore};

use crate::error::CacheResult;

/// Generate random bytes of the specified length from the OS generator
pub fn random_bytes(length: usize) -> CacheResult<Vec<u8>> {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    Ok(bytes)
}

/// Constant-time comparison of two byte slices to avoid timing attacks
///
/// Used when verifying the caller-supplied device secret against the one
/// the store currently holds.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
