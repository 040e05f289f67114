//! # Coffer Crypto
//!
//! Core cryptographic primitives for Coffer.
//!
//! This crate wraps vetted implementations and exposes the small surface the
//! key management core needs:
//! - Authenticated encryption with associated data (AES-256-GCM)
//! - Key derivation (HKDF-SHA256)
//! - Message authentication (HMAC-SHA2 family)
//! - Secure random generation
//! - Zeroizing key containers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod mac;
pub mod random;

pub use error::CryptoError;
pub use keys::{KeyMaterial, RootKey};
pub use mac::MacAlgorithm;
