//! Request structs.
//!
//! Field names follow the KMS SDK (`KeyId`, `GrantTokens`, ...). Enum-valued
//! fields are plain strings and are parsed by the dispatcher. Every field is
//! optional on the wire so that missing values surface as `ValidationError`
//! rather than as a deserialization failure.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use coffer_kms::EncryptionContext;

/// CreateKey.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateKeyRequest {
    /// Key policy document.
    pub policy: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// `ENCRYPT_DECRYPT` (default), `GENERATE_VERIFY_MAC`, ...
    pub key_usage: Option<String>,
    /// `SYMMETRIC_DEFAULT` (default), `HMAC_256`, ...
    pub key_spec: Option<String>,
    /// `COFFER_KMS` (default), `EXTERNAL` or `EXTERNAL_KEY_STORE`.
    pub origin: Option<String>,
    /// Creates a multi-region primary key.
    pub multi_region: Option<bool>,
    /// Skips the policy lockout check.
    pub bypass_policy_lockout_safety_check: Option<bool>,
}

/// DescribeKey.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DescribeKeyRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
}

/// Request naming a single key: EnableKey, DisableKey, CancelKeyDeletion,
/// DeleteImportedKeyMaterial and RotateKeyOnDemand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct KeyRequest {
    /// Key id or ARN.
    pub key_id: String,
}

impl KeyRequest {
    /// Request for `key_id`.
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
        }
    }
}

/// ScheduleKeyDeletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScheduleKeyDeletionRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// Waiting period, 7 to 30 days.
    pub pending_window_in_days: Option<u32>,
}

/// ImportKeyMaterial.
///
/// Transport-level wrapping of the material is out of scope; the dispatcher
/// receives the raw 32 bytes.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ImportKeyMaterialRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// Raw key material.
    pub key_material: Zeroizing<Vec<u8>>,
    /// `KEY_MATERIAL_EXPIRES` or `KEY_MATERIAL_DOES_NOT_EXPIRE` (default).
    pub expiration_model: Option<String>,
    /// Expiry (Unix seconds); required when the material expires.
    pub valid_to: Option<u64>,
}

impl std::fmt::Debug for ImportKeyMaterialRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportKeyMaterialRequest")
            .field("key_id", &self.key_id)
            .field("key_material", &"[REDACTED]")
            .field("expiration_model", &self.expiration_model)
            .field("valid_to", &self.valid_to)
            .finish()
    }
}

/// ReplicateKey and DeleteReplica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReplicaRequest {
    /// Key id or ARN of the primary key.
    pub key_id: String,
    /// Replica region.
    pub replica_region: String,
}

/// Encryption context constraint, as sent by clients. Exactly one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GrantConstraintsDto {
    /// Request context must equal this map.
    pub encryption_context_equals: Option<EncryptionContext>,
    /// This map must be a subset of the request context.
    pub encryption_context_subset: Option<EncryptionContext>,
}

/// CreateGrant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateGrantRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// Principal receiving the permissions.
    pub grantee_principal: Option<String>,
    /// Principal allowed to retire the grant.
    pub retiring_principal: Option<String>,
    /// Operation names, e.g. `Decrypt`.
    pub operations: Vec<String>,
    /// Encryption context constraint.
    pub constraints: Option<GrantConstraintsDto>,
    /// Name for idempotent creation.
    pub name: Option<String>,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

/// ListGrants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListGrantsRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// Only this grant.
    pub grant_id: Option<String>,
    /// Only grants for this grantee.
    pub grantee_principal: Option<String>,
}

/// RetireGrant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RetireGrantRequest {
    /// Grant token identifying the grant.
    pub grant_token: Option<String>,
    /// Key id or ARN, with `GrantId`.
    pub key_id: Option<String>,
    /// Grant id.
    pub grant_id: Option<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

/// RevokeGrant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RevokeGrantRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// Grant id.
    pub grant_id: String,
    /// Check only.
    pub dry_run: Option<bool>,
}

/// GenerateDataKey and GenerateDataKeyWithoutPlaintext.
///
/// Exactly one of `KeySpec` and `NumberOfBytes` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GenerateDataKeyRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// `AES_128` or `AES_256`.
    pub key_spec: Option<String>,
    /// Length in bytes, 1 to 1024.
    pub number_of_bytes: Option<usize>,
    /// Context bound to the wrapped key.
    pub encryption_context: EncryptionContext,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

/// Encrypt.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EncryptRequest {
    /// Key id or ARN.
    pub key_id: String,
    /// Data to encrypt, 1 to 4096 bytes.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Context bound to the ciphertext.
    pub encryption_context: EncryptionContext,
    /// Defaults to `SYMMETRIC_DEFAULT`.
    pub encryption_algorithm: Option<String>,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

impl std::fmt::Debug for EncryptRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptRequest")
            .field("key_id", &self.key_id)
            .field("plaintext", &"[REDACTED]")
            .field("encryption_algorithm", &self.encryption_algorithm)
            .finish_non_exhaustive()
    }
}

/// Decrypt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DecryptRequest {
    /// Ciphertext blob.
    pub ciphertext_blob: Vec<u8>,
    /// Expected key.
    pub key_id: Option<String>,
    /// Context the blob is bound to.
    pub encryption_context: EncryptionContext,
    /// Defaults to `SYMMETRIC_DEFAULT`.
    pub encryption_algorithm: Option<String>,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

/// ReEncrypt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReEncryptRequest {
    /// Ciphertext blob to move.
    pub ciphertext_blob: Vec<u8>,
    /// Expected source key.
    pub source_key_id: Option<String>,
    /// Context the blob is bound to.
    pub source_encryption_context: EncryptionContext,
    /// Defaults to `SYMMETRIC_DEFAULT`.
    pub source_encryption_algorithm: Option<String>,
    /// Destination key id or ARN.
    pub destination_key_id: String,
    /// Context for the new blob.
    pub destination_encryption_context: EncryptionContext,
    /// Defaults to `SYMMETRIC_DEFAULT`.
    pub destination_encryption_algorithm: Option<String>,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

/// GenerateMac.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GenerateMacRequest {
    /// HMAC key id or ARN.
    pub key_id: String,
    /// Message, 1 to 4096 bytes.
    pub message: Vec<u8>,
    /// `HMAC_SHA_256`, ...
    pub mac_algorithm: String,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

/// VerifyMac.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VerifyMacRequest {
    /// HMAC key id or ARN.
    pub key_id: String,
    /// Message, 1 to 4096 bytes.
    pub message: Vec<u8>,
    /// Tag to check.
    pub mac: Vec<u8>,
    /// `HMAC_SHA_256`, ...
    pub mac_algorithm: String,
    /// Grant tokens.
    pub grant_tokens: Vec<String>,
    /// Check only.
    pub dry_run: Option<bool>,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_field_names() {
        let request: GenerateDataKeyRequest = serde_json::from_str(
            r#"{"KeyId":"alias","KeySpec":"AES_256","EncryptionContext":{"dept":"eng"},"GrantTokens":["t"]}"#,
        )
        .unwrap();

        assert_eq!(request.key_id, "alias");
        assert_eq!(request.key_spec.as_deref(), Some("AES_256"));
        assert_eq!(request.encryption_context.get("dept"), Some("eng"));
        assert_eq!(request.grant_tokens, vec!["t"]);
        assert!(request.number_of_bytes.is_none());
        assert!(request.dry_run.is_none());
    }

    #[test]
    fn test_constraints_shape() {
        let request: CreateGrantRequest = serde_json::from_str(
            r#"{"KeyId":"k","GranteePrincipal":"p","Operations":["Decrypt"],
                "Constraints":{"EncryptionContextSubset":{"app":"billing"}}}"#,
        )
        .unwrap();

        let constraints = request.constraints.unwrap();
        assert!(constraints.encryption_context_equals.is_none());
        assert_eq!(
            constraints.encryption_context_subset,
            Some(EncryptionContext::new().with("app", "billing"))
        );
    }

    #[test]
    fn test_plaintext_not_in_debug() {
        let request = EncryptRequest {
            key_id: "k".into(),
            plaintext: Zeroizing::new(b"top secret".to_vec()),
            ..Default::default()
        };
        assert!(!format!("{request:?}").contains("115"));
        assert!(format!("{request:?}").contains("REDACTED"));
    }
}
