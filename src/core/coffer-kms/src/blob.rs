//! Ciphertext blob layout.
//!
//! ```text
//! "CFB" | version u8 | key id len u8 | key id | material version u32 BE | nonce (12) | ciphertext + tag
//! ```
//!
//! The associated data is the header (everything before the nonce) followed
//! by the canonical encryption context, so the key id and material version
//! are authenticated along with the context.

use zeroize::Zeroizing;

use coffer_crypto::{aead, CryptoError};

use crate::context::EncryptionContext;
use crate::error::KmsError;

/// Blob magic.
pub const MAGIC: &[u8; 3] = b"CFB";

/// Current blob format version.
pub const FORMAT_VERSION: u8 = 1;

/// Longest key id a blob can carry.
pub const MAX_KEY_ID_LEN: usize = u8::MAX as usize;

/// Largest blob accepted on input.
pub const MAX_BLOB_LEN: usize = 6144;

/// Identifies the master key material that wrapped a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    /// Key id.
    pub key_id: String,
    /// Material version of that key.
    pub material_version: u32,
}

impl BlobHeader {
    /// Header for `key_id` at `material_version`.
    pub fn new(key_id: impl Into<String>, material_version: u32) -> Self {
        Self {
            key_id: key_id.into(),
            material_version,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, KmsError> {
        let id = self.key_id.as_bytes();
        let id_len = u8::try_from(id.len())
            .map_err(|_| KmsError::Validation(format!("key id longer than {MAX_KEY_ID_LEN} bytes")))?;

        let mut out = Vec::with_capacity(MAGIC.len() + 2 + id.len() + 4);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.push(id_len);
        out.extend_from_slice(id);
        out.extend_from_slice(&self.material_version.to_be_bytes());
        Ok(out)
    }
}

/// A blob split into its header and sealed parts.
#[derive(Debug)]
pub struct ParsedBlob<'a> {
    /// Decoded header.
    pub header: BlobHeader,
    header_bytes: &'a [u8],
    sealed: &'a [u8],
}

/// Splits a blob. Anything malformed is `InvalidCiphertext`.
pub fn parse(blob: &[u8]) -> Result<ParsedBlob<'_>, KmsError> {
    let fixed = MAGIC.len() + 2;
    if blob.len() < fixed || &blob[..MAGIC.len()] != MAGIC || blob[MAGIC.len()] != FORMAT_VERSION {
        return Err(KmsError::InvalidCiphertext);
    }

    let id_len = usize::from(blob[MAGIC.len() + 1]);
    let header_len = fixed + id_len + 4;
    if id_len == 0 || blob.len() < header_len + aead::MIN_SEALED_LEN {
        return Err(KmsError::InvalidCiphertext);
    }

    let key_id = std::str::from_utf8(&blob[fixed..fixed + id_len])
        .map_err(|_| KmsError::InvalidCiphertext)?
        .to_string();
    let mut version = [0u8; 4];
    version.copy_from_slice(&blob[fixed + id_len..header_len]);

    Ok(ParsedBlob {
        header: BlobHeader {
            key_id,
            material_version: u32::from_be_bytes(version),
        },
        header_bytes: &blob[..header_len],
        sealed: &blob[header_len..],
    })
}

/// Wraps `plaintext` under `material` and returns the blob.
pub fn wrap(
    material: &[u8],
    header: &BlobHeader,
    plaintext: &[u8],
    context: &EncryptionContext,
) -> Result<Vec<u8>, KmsError> {
    let mut blob = header.encode()?;
    let aad = associated_data(&blob, context);
    let sealed = aead::seal(material, plaintext, &aad)?;
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Recovers the plaintext of a parsed blob.
///
/// A wrong key, a wrong context or any tampering yields `InvalidCiphertext`.
pub fn unwrap(
    material: &[u8],
    parsed: &ParsedBlob<'_>,
    context: &EncryptionContext,
) -> Result<Zeroizing<Vec<u8>>, KmsError> {
    let aad = associated_data(parsed.header_bytes, context);
    aead::open(material, parsed.sealed, &aad).map_err(|e| match e {
        CryptoError::AuthenticationFailed | CryptoError::InvalidInput(_) => {
            KmsError::InvalidCiphertext
        },
        other => other.into(),
    })
}

fn associated_data(header: &[u8], context: &EncryptionContext) -> Vec<u8> {
    let mut aad = header.to_vec();
    aad.extend_from_slice(&context.to_aad());
    aad
}
