//! HKDF-SHA256 key derivation (RFC 5869).
//!
//! The root key never encrypts anything directly. Sealing keys for stored key
//! material and the grant-token signing key are derived from it with distinct
//! `info` labels.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;

/// Largest output HKDF-SHA256 can produce.
const MAX_OUTPUT: usize = 255 * 32;

/// Derives `length` bytes from `ikm` with optional `salt` and context `info`.
pub fn derive_key(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if length == 0 || length > MAX_OUTPUT {
        return Err(CryptoError::InvalidInput(format!(
            "hkdf output length must be within 1..={MAX_OUTPUT}, got {length}"
        )));
    }

    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hkdf.expand(info, &mut okm)
        .map_err(|_| CryptoError::DerivationFailed("hkdf expansion failed".to_string()))?;

    Ok(okm)
}

/// Derives a 32-byte AES-256 key bound to `label`.
pub fn derive_subkey(ikm: &[u8], label: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let derived = derive_key(ikm, None, label.as_bytes(), KEY_SIZE)?;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&derived);
    Ok(key)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_same_label_same_key() {
        let a = derive_subkey(b"root", "coffer-kms-v1:key-1:1").unwrap();
        let b = derive_subkey(b"root", "coffer-kms-v1:key-1:1").unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_labels_separate_keys() {
        let v1 = derive_subkey(b"root", "coffer-kms-v1:key-1:1").unwrap();
        let v2 = derive_subkey(b"root", "coffer-kms-v1:key-1:2").unwrap();
        let other = derive_subkey(b"root", "coffer-kms-v1:key-2:1").unwrap();

        assert_ne!(*v1, *v2);
        assert_ne!(*v1, *other);
    }

    #[test]
    fn test_salt_changes_output() {
        let a = derive_key(b"ikm", Some(b"salt-a"), b"info", 32).unwrap();
        let b = derive_key(b"ikm", Some(b"salt-b"), b"info", 32).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_length_bounds() {
        assert!(derive_key(b"ikm", None, b"info", 0).is_err());
        assert!(derive_key(b"ikm", None, b"info", MAX_OUTPUT + 1).is_err());
        assert_eq!(derive_key(b"ikm", None, b"info", 64).unwrap().len(), 64);
    }

    #[test]
    fn test_rfc5869_case_1() {
        let ikm = hex::decode("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b").unwrap();
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = derive_key(&ikm, Some(&salt), &info, 42).unwrap();

        assert_eq!(
            hex::encode(&*okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }
}
