//! Grant tokens.
//!
//! Format: `base64url(payload JSON) "." base64url(HMAC-SHA256(payload))`.
//!
//! The signing key is derived from the root key, so any node holding the root
//! key can check a token before the grant it names is visible there.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use coffer_crypto::{aead, kdf, mac, random, MacAlgorithm, RootKey};

use crate::context::GrantConstraints;
use crate::error::KmsError;
use crate::grants::GrantOperation;
use crate::types::Principal;

/// Longest accepted token, in bytes.
pub const MAX_TOKEN_LEN: usize = 8192;

const SIGNING_LABEL: &str = "coffer-kms-v1:grant-token";

/// Signed content of a grant token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantClaims {
    /// Grant id.
    pub gid: String,
    /// Key id.
    pub kid: String,
    /// Grantee principal.
    pub grantee: Principal,
    /// Permitted operations.
    pub ops: Vec<GrantOperation>,
    /// Encryption context constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<GrantConstraints>,
    /// Issue time (Unix seconds).
    pub iat: u64,
    /// Random per-token value; doubles as the token id.
    pub nonce: String,
}

/// Issues and checks grant tokens.
pub struct TokenSigner {
    key: Zeroizing<[u8; aead::KEY_SIZE]>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenSigner([REDACTED])")
    }
}

impl TokenSigner {
    /// Derives the signing key from the root key.
    pub fn new(root_key: &RootKey) -> Result<Self, KmsError> {
        Ok(Self {
            key: kdf::derive_subkey(root_key.as_bytes(), SIGNING_LABEL)?,
        })
    }

    /// Fresh random token id.
    pub fn new_nonce() -> String {
        random::hex_encode(&random::generate_bytes(16))
    }

    /// Signs `claims` into a token string.
    pub fn issue(&self, claims: &GrantClaims) -> Result<String, KmsError> {
        let payload = serde_json::to_vec(claims).map_err(|e| KmsError::Validation(e.to_string()))?;
        let payload = B64URL.encode(payload);
        let tag = mac::compute(MacAlgorithm::HmacSha256, &self.key[..], payload.as_bytes())?;
        Ok(format!("{payload}.{}", B64URL.encode(tag)))
    }

    /// Returns the claims of a token signed by this signer, or `None`.
    pub fn verify(&self, token: &str) -> Option<GrantClaims> {
        if token.len() > MAX_TOKEN_LEN {
            return None;
        }
        let (payload, tag) = token.split_once('.')?;
        let tag = B64URL.decode(tag).ok()?;
        mac::verify(MacAlgorithm::HmacSha256, &self.key[..], payload.as_bytes(), &tag).ok()?;

        let payload = B64URL.decode(payload).ok()?;
        serde_json::from_slice(&payload).ok()
    }
}
