//! Response structs.

use serde::Serialize;
use zeroize::Zeroizing;

use coffer_kms::{Grant, KeyMetadata, KeyState};

use crate::requests::GrantConstraintsDto;

/// Key metadata as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyMetadataDto {
    /// Key id.
    pub key_id: String,
    /// Key ARN.
    pub arn: String,
    /// Owning account.
    pub account_id: String,
    /// Creating principal.
    pub owner: String,
    /// Description.
    pub description: String,
    /// Lifecycle state.
    pub key_state: String,
    /// Whether the key is Enabled.
    pub enabled: bool,
    /// Key usage.
    pub key_usage: String,
    /// Key spec.
    pub key_spec: String,
    /// Material origin.
    pub origin: String,
    /// Creation time (Unix seconds).
    pub creation_date: u64,
    /// Scheduled deletion time (Unix seconds).
    pub deletion_date: Option<u64>,
    /// Waiting period of a scheduled deletion.
    pub pending_deletion_window_in_days: Option<u32>,
    /// Expiry of imported material (Unix seconds).
    pub valid_to: Option<u64>,
    /// Expiration model of imported material.
    pub expiration_model: Option<String>,
    /// Encryption algorithms the key supports.
    pub encryption_algorithms: Vec<String>,
    /// MAC algorithms the key supports.
    pub mac_algorithms: Vec<String>,
    /// Whether this is a multi-region key.
    pub multi_region: bool,
    /// Regions holding replicas.
    pub replica_regions: Vec<String>,
    /// Current material version.
    pub current_key_material_version: u32,
}

impl From<&KeyMetadata> for KeyMetadataDto {
    fn from(metadata: &KeyMetadata) -> Self {
        Self {
            key_id: metadata.key_id.clone(),
            arn: metadata.arn.clone(),
            account_id: metadata.account_id.clone(),
            owner: metadata.owner.to_string(),
            description: metadata.description.clone(),
            key_state: metadata.state.to_string(),
            enabled: metadata.state == KeyState::Enabled,
            key_usage: metadata.usage.to_string(),
            key_spec: metadata.key_spec.to_string(),
            origin: metadata.origin.to_string(),
            creation_date: metadata.creation_date,
            deletion_date: metadata.deletion_date,
            pending_deletion_window_in_days: metadata.pending_deletion_window_days,
            valid_to: metadata.valid_to,
            expiration_model: metadata.expiration_model.map(|m| m.to_string()),
            encryption_algorithms: metadata
                .key_spec
                .encryption_algorithms()
                .iter()
                .map(|a| a.to_string())
                .collect(),
            mac_algorithms: metadata
                .key_spec
                .mac_algorithm()
                .map(|a| coffer_kms::MacAlgorithmSpec::from(a).to_string())
                .into_iter()
                .collect(),
            multi_region: metadata.multi_region,
            replica_regions: metadata.replica_regions.clone(),
            current_key_material_version: metadata.current_material_version,
        }
    }
}

/// CreateKey, DescribeKey, DeleteReplica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyMetadataResponse {
    /// Key metadata.
    pub key_metadata: KeyMetadataDto,
}

impl From<&KeyMetadata> for KeyMetadataResponse {
    fn from(metadata: &KeyMetadata) -> Self {
        Self {
            key_metadata: metadata.into(),
        }
    }
}

/// One entry of ListKeys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyListEntry {
    /// Key id.
    pub key_id: String,
    /// Key ARN.
    pub key_arn: String,
}

/// ListKeys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListKeysResponse {
    /// Keys, oldest first.
    pub keys: Vec<KeyListEntry>,
}

/// CancelKeyDeletion and RotateKeyOnDemand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyIdResponse {
    /// Key ARN.
    pub key_id: String,
}

/// ScheduleKeyDeletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduleKeyDeletionResponse {
    /// Key ARN.
    pub key_id: String,
    /// New state.
    pub key_state: String,
    /// Deletion time (Unix seconds); unset while replicas remain.
    pub deletion_date: Option<u64>,
    /// Waiting period.
    pub pending_window_in_days: u32,
}

/// ReplicateKey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicateKeyResponse {
    /// ARN of the replica key.
    pub replica_key_arn: String,
    /// Metadata of the primary key.
    pub key_metadata: KeyMetadataDto,
}

/// CreateGrant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateGrantResponse {
    /// Grant id.
    pub grant_id: String,
    /// Grant token, usable right away.
    pub grant_token: String,
}

/// One entry of ListGrants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GrantListEntry {
    /// Key id.
    pub key_id: String,
    /// Grant id.
    pub grant_id: String,
    /// Grant name.
    pub name: Option<String>,
    /// Creation time (Unix seconds).
    pub creation_date: u64,
    /// Grantee.
    pub grantee_principal: String,
    /// Retiring principal.
    pub retiring_principal: Option<String>,
    /// Principal that created the grant.
    pub issuing_account: String,
    /// Delegated operations.
    pub operations: Vec<String>,
    /// Encryption context constraint.
    pub constraints: Option<GrantConstraintsDto>,
}

impl From<&Grant> for GrantListEntry {
    fn from(grant: &Grant) -> Self {
        use coffer_kms::GrantConstraints;

        Self {
            key_id: grant.key_id.clone(),
            grant_id: grant.grant_id.clone(),
            name: grant.name.clone(),
            creation_date: grant.creation_date,
            grantee_principal: grant.grantee.to_string(),
            retiring_principal: grant.retiring_principal.as_ref().map(|p| p.to_string()),
            issuing_account: grant.issuing_principal.to_string(),
            operations: grant.operations.iter().map(|op| op.to_string()).collect(),
            constraints: grant.constraints.as_ref().map(|c| match c {
                GrantConstraints::EncryptionContextEquals(ctx) => GrantConstraintsDto {
                    encryption_context_equals: Some(ctx.clone()),
                    encryption_context_subset: None,
                },
                GrantConstraints::EncryptionContextSubset(ctx) => GrantConstraintsDto {
                    encryption_context_equals: None,
                    encryption_context_subset: Some(ctx.clone()),
                },
            }),
        }
    }
}

/// ListGrants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListGrantsResponse {
    /// Grants, oldest first.
    pub grants: Vec<GrantListEntry>,
}

/// GenerateDataKey.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenerateDataKeyResponse {
    /// ARN of the wrapping key.
    pub key_id: String,
    /// Plaintext data key.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Wrapped data key.
    pub ciphertext_blob: Vec<u8>,
}

impl std::fmt::Debug for GenerateDataKeyResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateDataKeyResponse")
            .field("key_id", &self.key_id)
            .field("plaintext", &"[REDACTED]")
            .field("ciphertext_blob_len", &self.ciphertext_blob.len())
            .finish()
    }
}

/// GenerateDataKeyWithoutPlaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenerateDataKeyWithoutPlaintextResponse {
    /// ARN of the wrapping key.
    pub key_id: String,
    /// Wrapped data key.
    pub ciphertext_blob: Vec<u8>,
}

/// Encrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptResponse {
    /// ARN of the key.
    pub key_id: String,
    /// Ciphertext blob.
    pub ciphertext_blob: Vec<u8>,
    /// Algorithm used.
    pub encryption_algorithm: String,
}

/// Decrypt.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecryptResponse {
    /// ARN of the key.
    pub key_id: String,
    /// Recovered plaintext.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Algorithm used.
    pub encryption_algorithm: String,
}

impl std::fmt::Debug for DecryptResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptResponse")
            .field("key_id", &self.key_id)
            .field("plaintext", &"[REDACTED]")
            .field("encryption_algorithm", &self.encryption_algorithm)
            .finish()
    }
}

/// ReEncrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReEncryptResponse {
    /// ARN of the source key.
    pub source_key_id: String,
    /// ARN of the destination key.
    pub key_id: String,
    /// New ciphertext blob.
    pub ciphertext_blob: Vec<u8>,
    /// Algorithm of the source blob.
    pub source_encryption_algorithm: String,
    /// Algorithm of the new blob.
    pub destination_encryption_algorithm: String,
}

/// GenerateMac.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenerateMacResponse {
    /// ARN of the key.
    pub key_id: String,
    /// Tag.
    pub mac: Vec<u8>,
    /// Algorithm used.
    pub mac_algorithm: String,
}

/// VerifyMac.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VerifyMacResponse {
    /// ARN of the key.
    pub key_id: String,
    /// Whether the tag matched.
    pub mac_valid: bool,
    /// Algorithm used.
    pub mac_algorithm: String,
}
