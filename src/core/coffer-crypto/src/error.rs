//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authenticated decryption failed (wrong key, tampered data or wrong AAD).
    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,

    /// MAC verification failed.
    #[error("mac verification failed")]
    MacMismatch,

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
