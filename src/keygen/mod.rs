/*!
 * Key derivation from cached entropy
 *
 * Symmetric keys are derived by consuming a seed from the cache and, for
 * AES-256, expanding it with HKDF-SHA256. Asymmetric pairs are produced by
 * a [`KeyPairProvider`]: X25519 is built in, post-quantum schemes plug in
 * through the same trait. Every derivation consumes fresh pool bytes and
 * fails fast with `RandomPoolExpired` when the pool cannot cover the seed.
 */

mod asymmetric;
mod symmetric;

pub use asymmetric::DefaultKeyPairProvider;
pub use asymmetric::KeyPairProvider;
pub use asymmetric::derive_asymmetric;
pub use symmetric::derive_symmetric;

#[cfg(test)]
mod tests;
