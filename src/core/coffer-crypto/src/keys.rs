//! Key containers with automatic memory zeroization.
//!
//! Both types implement `Zeroize` and `ZeroizeOnDrop`, and their `Debug`
//! output never shows the bytes.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;
use crate::random::{generate_key, generate_secret};

/// Backing material of a master key.
///
/// Symmetric encryption keys hold 32 bytes; HMAC keys hold as many bytes as
/// their digest size.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Generates `len` bytes of fresh material.
    pub fn generate(len: usize) -> Result<Self, CryptoError> {
        if len == 0 {
            return Err(CryptoError::InvalidKey("key material cannot be empty".into()));
        }
        Ok(Self {
            bytes: generate_secret(len).to_vec(),
        })
    }

    /// Wraps existing bytes (imported or unsealed material).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::InvalidKey("key material cannot be empty".into()));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Returns the raw material.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the material in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the material is empty (never true for constructed values).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        if self.bytes.len() != other.bytes.len() {
            return false;
        }
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for KeyMaterial {}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The process root key.
///
/// Supplied by the host at startup; everything persisted is sealed under keys
/// derived from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    bytes: [u8; KEY_SIZE],
}

impl RootKey {
    /// Generates a random root key (development mode and tests).
    pub fn generate() -> Self {
        Self {
            bytes: *generate_key(),
        }
    }

    /// Creates a root key from exactly 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "root key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
