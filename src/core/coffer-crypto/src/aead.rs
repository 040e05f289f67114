//! AES-256-GCM authenticated encryption.
//!
//! Every master key and every sealed record in Coffer is protected with
//! AES-256-GCM. Callers always bind associated data: the envelope engine uses
//! the blob header plus the encryption context, the key store uses the key id
//! and material version.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::random::generate_nonce;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Smallest sealed output: a nonce and a tag around an empty plaintext.
pub const MIN_SEALED_LEN: usize = NONCE_SIZE + TAG_SIZE;

fn cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "expected {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Seals `plaintext` under `key`, authenticating `aad`.
///
/// A fresh random nonce is generated for every call and prepended to the
/// output. Format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;
    let nonce_bytes = generate_nonce();

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Opens data produced by [`seal`].
///
/// The recovered plaintext is wrapped in `Zeroizing` so it is wiped when the
/// caller drops it.
pub fn open(key: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = cipher(key)?;

    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::InvalidInput("sealed data too short".to_string()));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(Zeroizing::new(plaintext))
}
