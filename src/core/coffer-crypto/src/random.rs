//! Cryptographically secure random generation.
//!
//! All randomness comes from the operating system CSPRNG.

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::aead::{KEY_SIZE, NONCE_SIZE};

/// Generates a random 256-bit key, wiped on drop.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut *key);
    key
}

/// Generates a random AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generates `len` random secret bytes, wiped on drop.
///
/// Used for data keys and HMAC key material, whose length depends on the
/// request or key spec.
pub fn generate_secret(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generates `len` random non-secret bytes (nonces, identifiers).
pub fn generate_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generates a random identifier in 8-4-4-4-12 hex layout.
pub fn generate_id() -> String {
    let hex = hex_encode(&generate_bytes(16));
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Encodes bytes as lowercase hexadecimal.
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_secret_lengths() {
        for len in [1, 16, 32, 64, 1024] {
            assert_eq!(generate_secret(len).len(), len);
        }
    }

    #[test]
    fn test_keys_unique() {
        assert_ne!(*generate_key(), *generate_key());
    }

    #[test]
    fn test_generate_id_layout() {
        let id = generate_id();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();

        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert!(id.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ids_do_not_repeat() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(generate_id()), "duplicate id generated");
        }
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0x0f, 0xa5, 0xff]), "000fa5ff");
    }
}
