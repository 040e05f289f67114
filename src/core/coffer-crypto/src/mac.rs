//! HMAC-SHA2 message authentication.

use hmac::{Hmac, Mac};
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::error::CryptoError;

/// Supported HMAC algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacAlgorithm {
    /// HMAC with SHA-224.
    HmacSha224,
    /// HMAC with SHA-256.
    HmacSha256,
    /// HMAC with SHA-384.
    HmacSha384,
    /// HMAC with SHA-512.
    HmacSha512,
}

impl MacAlgorithm {
    /// Digest (and recommended key) size in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::HmacSha224 => 28,
            Self::HmacSha256 => 32,
            Self::HmacSha384 => 48,
            Self::HmacSha512 => 64,
        }
    }
}

macro_rules! compute_with {
    ($digest:ty, $key:expr, $message:expr) => {{
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        mac.update($message);
        mac.finalize().into_bytes().to_vec()
    }};
}

macro_rules! verify_with {
    ($digest:ty, $key:expr, $message:expr, $tag:expr) => {{
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        mac.update($message);
        mac.verify_slice($tag).map_err(|_| CryptoError::MacMismatch)
    }};
}

/// Computes the MAC of `message` under `key`.
pub fn compute(algorithm: MacAlgorithm, key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let tag = match algorithm {
        MacAlgorithm::HmacSha224 => compute_with!(Sha224, key, message),
        MacAlgorithm::HmacSha256 => compute_with!(Sha256, key, message),
        MacAlgorithm::HmacSha384 => compute_with!(Sha384, key, message),
        MacAlgorithm::HmacSha512 => compute_with!(Sha512, key, message),
    };
    Ok(tag)
}

/// Verifies `tag` over `message` in constant time.
pub fn verify(
    algorithm: MacAlgorithm,
    key: &[u8],
    message: &[u8],
    tag: &[u8],
) -> Result<(), CryptoError> {
    match algorithm {
        MacAlgorithm::HmacSha224 => verify_with!(Sha224, key, message, tag),
        MacAlgorithm::HmacSha256 => verify_with!(Sha256, key, message, tag),
        MacAlgorithm::HmacSha384 => verify_with!(Sha384, key, message, tag),
        MacAlgorithm::HmacSha512 => verify_with!(Sha512, key, message, tag),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_output_lengths() {
        for algorithm in [
            MacAlgorithm::HmacSha224,
            MacAlgorithm::HmacSha256,
            MacAlgorithm::HmacSha384,
            MacAlgorithm::HmacSha512,
        ] {
            let tag = compute(algorithm, b"key", b"message").unwrap();
            assert_eq!(tag.len(), algorithm.output_len());
        }
    }

    #[test]
    fn test_verify_accepts_own_tag() {
        let tag = compute(MacAlgorithm::HmacSha384, b"secret", b"hello").unwrap();
        verify(MacAlgorithm::HmacSha384, b"secret", b"hello", &tag).unwrap();
    }

    #[test]
    fn test_verify_rejects_other_message() {
        let tag = compute(MacAlgorithm::HmacSha256, b"secret", b"hello").unwrap();
        let result = verify(MacAlgorithm::HmacSha256, b"secret", b"hellO", &tag);
        assert!(matches!(result, Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn test_rfc4231_case_2() {
        let tag = compute(
            MacAlgorithm::HmacSha256,
            b"Jefe",
            b"what do ya want for nothing?",
        )
        .unwrap();

        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
