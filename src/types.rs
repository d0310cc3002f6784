/*!
 * Public data types for the randpool entropy cache
 *
 * Key modes, cache state and status reporting, and the key material
 * containers handed back to callers.
 */

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Symmetric key generation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymmetricKeyMode {
    /// AES-256: a fixed-size seed is consumed from the pool and expanded
    /// into a 256-bit key
    Aes256,
    /// One-time-pad: raw pool bytes are returned unmodified as key material
    /// and must never be reused
    Otp,
}

/// Asymmetric key generation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsymmetricKeyMode {
    /// Elliptic-curve Diffie-Hellman over Curve25519
    Ecdh,
    /// FrodoKEM (requires an injected key pair provider)
    Frodo,
    /// CRYSTALS-Kyber (requires an injected key pair provider)
    Kyber,
}

impl Display for SymmetricKeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymmetricKeyMode::Aes256 => write!(f, "AES-256"),
            SymmetricKeyMode::Otp => write!(f, "OTP"),
        }
    }
}

impl Display for AsymmetricKeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsymmetricKeyMode::Ecdh => write!(f, "ECDH"),
            AsymmetricKeyMode::Frodo => write!(f, "FrodoKEM"),
            AsymmetricKeyMode::Kyber => write!(f, "Kyber"),
        }
    }
}

/// State of the local random pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    /// Downloading the initial random pool; the minimum watermark has not
    /// been reached yet
    Downloading,
    /// The pool reached the minimum watermark at least once
    Ready,
}

/// Cache status information returned by `check_cache_status`
///
/// `remaining_capacity` is recomputed live on every call by summing the
/// unconsumed bytes of all usable segments; `total_downloaded_random` is a
/// monotonic counter of bytes ever fetched from the entropy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    pub state: CacheState,
    pub remaining_capacity: u64,
    pub total_downloaded_random: u64,
}

/// Symmetric key material plus opaque metadata
///
/// The metadata describes how the key was derived so a cooperating peer
/// could reconstruct it; the local cache treats it as opaque bytes.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SymmetricKeyData {
    /// Symmetric key bytes
    pub key: Vec<u8>,
    /// Opaque derivation metadata
    pub metadata: Vec<u8>,
}

impl fmt::Debug for SymmetricKeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKeyData")
            .field("key", &format!("[{} bytes]", self.key.len()))
            .field("metadata", &format!("[{} bytes]", self.metadata.len()))
            .finish()
    }
}

/// Asymmetric key pair
///
/// Ownership transfers fully to the caller; the engine retains neither the
/// seed nor the private key after return. The private key is zeroed when
/// the pair is dropped.
pub struct AsymmetricKeyPair {
    /// Private key bytes
    pub private_key: Vec<u8>,
    /// Public key bytes
    pub public_key: Vec<u8>,
}

impl Zeroize for AsymmetricKeyPair {
    fn zeroize(&mut self) {
        self.private_key.zeroize();
    }
}

impl Drop for AsymmetricKeyPair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for AsymmetricKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricKeyPair")
            .field("private_key", &format!("[{} bytes]", self.private_key.len()))
            .field("public_key", &format!("[{} bytes]", self.public_key.len()))
            .finish()
    }
}
