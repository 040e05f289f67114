//! Request dispatcher.
//!
//! Validates request shape, parses enum strings, delegates to the KMS core and
//! maps errors to [`ApiError`]. Cryptographic operations are audited by the
//! engine; every other operation is audited here.

use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;
use zeroize::Zeroizing;

use coffer_crypto::RootKey;
use coffer_kms::blob::MAX_BLOB_LEN;
use coffer_kms::config::{MAX_PENDING_WINDOW_DAYS, MIN_PENDING_WINDOW_DAYS};
use coffer_kms::envelope::MAX_PLAINTEXT_LEN;
use coffer_kms::grants::MAX_GRANT_TOKENS;
use coffer_kms::{
    AuditEvent, CreateGrantParams, CreateKeyParams, DataKeyLength, DataKeySpec, DecryptParams,
    EncryptParams, EncryptionAlgorithm, EncryptionContext, ExpirationModel,
    GenerateDataKeyParams, GenerateMacParams, GrantConstraints, GrantOperation, KeyMetadata,
    KeySpec, KeyTransition, KeyUsage, KmsConfig, KmsCore, KmsError, MacAlgorithmSpec, Origin,
    Outcome, Principal, PurgeReport, ReEncryptParams, RetireGrantParams, VerifyMacParams,
};
use coffer_storage::StorageBackend;

use crate::error::ApiError;
use crate::requests::*;
use crate::responses::*;

/// Longest accepted key id or ARN.
pub const MAX_KEY_REF_LEN: usize = 2048;

/// Most pairs an encryption context or grant constraint may hold.
pub const MAX_CONTEXT_PAIRS: usize = 64;

/// Largest encryption context or grant constraint, keys and values summed.
pub const MAX_CONTEXT_BYTES: usize = 8192;

/// Authenticated identity of the caller, supplied by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// Calling principal.
    pub principal: Principal,
}

impl CallerContext {
    /// Context for `principal`.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: Principal::new(principal),
        }
    }
}

/// Entry point for every KMS operation.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    core: KmsCore,
}

impl Dispatcher {
    /// Dispatcher over an assembled core.
    pub fn new(core: KmsCore) -> Self {
        Self { core }
    }

    /// Opens the core over `backend` and wraps it.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        root_key: RootKey,
        config: KmsConfig,
    ) -> Result<Self, ApiError> {
        Ok(Self::new(KmsCore::open(backend, root_key, config).await?))
    }

    /// The underlying core.
    pub fn core(&self) -> &KmsCore {
        &self.core
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// CreateKey.
    pub async fn create_key(
        &self,
        caller: &CallerContext,
        request: CreateKeyRequest,
    ) -> Result<KeyMetadataResponse, ApiError> {
        let params = CreateKeyParams {
            policy: request.policy,
            description: request.description.unwrap_or_default(),
            usage: parse_or("KeyUsage", request.key_usage.as_deref(), KeyUsage::EncryptDecrypt)?,
            key_spec: parse_or("KeySpec", request.key_spec.as_deref(), KeySpec::SymmetricDefault)?,
            origin: parse_or("Origin", request.origin.as_deref(), Origin::Internal)?,
            multi_region: request.multi_region.unwrap_or(false),
            bypass_policy_lockout_safety_check: request
                .bypass_policy_lockout_safety_check
                .unwrap_or(false),
        };

        let result = self.core.keys.create(&caller.principal, params).await;
        let key_id = result.as_ref().ok().map(|m| m.key_id.clone());
        let metadata = self
            .audited(AuditEvent::new("CreateKey", &caller.principal), key_id.as_deref(), result)
            .await?;
        Ok((&metadata).into())
    }

    /// DescribeKey. Allowed by the key policy or by a `DescribeKey` grant.
    pub async fn describe_key(
        &self,
        caller: &CallerContext,
        request: DescribeKeyRequest,
    ) -> Result<KeyMetadataResponse, ApiError> {
        required("KeyId", &request.key_id)?;
        validate_tokens(&request.grant_tokens)?;

        let result = async {
            let metadata = self.core.keys.describe(&request.key_id).await?;
            let allowed = self
                .core
                .grants
                .authorize(
                    &metadata.key_id,
                    &caller.principal,
                    GrantOperation::DescribeKey,
                    &EncryptionContext::new(),
                    &request.grant_tokens,
                )
                .await?;
            if !allowed {
                return Err(KmsError::Unauthorized {
                    principal: caller.principal.to_string(),
                    operation: "DescribeKey".into(),
                    resource: metadata.arn,
                });
            }
            Ok(metadata)
        }
        .await;

        let metadata = self
            .audited(
                AuditEvent::new("DescribeKey", &caller.principal),
                Some(&request.key_id),
                result,
            )
            .await?;
        Ok((&metadata).into())
    }

    /// ListKeys: every key of the account, oldest first.
    pub async fn list_keys(&self, caller: &CallerContext) -> Result<ListKeysResponse, ApiError> {
        let keys = self.core.keys.list_keys().await;
        debug!(principal = %caller.principal, keys = keys.len(), "keys listed");

        Ok(ListKeysResponse {
            keys: keys
                .into_iter()
                .map(|m| KeyListEntry {
                    key_id: m.key_id,
                    key_arn: m.arn,
                })
                .collect(),
        })
    }

    /// EnableKey.
    pub async fn enable_key(
        &self,
        caller: &CallerContext,
        request: KeyRequest,
    ) -> Result<(), ApiError> {
        self.transition(caller, "EnableKey", &request.key_id, KeyTransition::Enable)
            .await
            .map(|_| ())
    }

    /// DisableKey.
    pub async fn disable_key(
        &self,
        caller: &CallerContext,
        request: KeyRequest,
    ) -> Result<(), ApiError> {
        self.transition(caller, "DisableKey", &request.key_id, KeyTransition::Disable)
            .await
            .map(|_| ())
    }

    /// ScheduleKeyDeletion. The waiting period defaults to the configured
    /// value and must lie within 7..=30 days.
    pub async fn schedule_key_deletion(
        &self,
        caller: &CallerContext,
        request: ScheduleKeyDeletionRequest,
    ) -> Result<ScheduleKeyDeletionResponse, ApiError> {
        let days = request
            .pending_window_in_days
            .unwrap_or(self.config().default_pending_window_days);
        if !(MIN_PENDING_WINDOW_DAYS..=MAX_PENDING_WINDOW_DAYS).contains(&days) {
            return Err(ApiError::validation(format!(
                "PendingWindowInDays must be between {MIN_PENDING_WINDOW_DAYS} and \
                 {MAX_PENDING_WINDOW_DAYS}, got {days}"
            )));
        }

        let metadata = self
            .transition(
                caller,
                "ScheduleKeyDeletion",
                &request.key_id,
                KeyTransition::ScheduleDeletion {
                    pending_window_days: Some(days),
                },
            )
            .await?;

        Ok(ScheduleKeyDeletionResponse {
            key_id: metadata.arn,
            key_state: metadata.state.to_string(),
            deletion_date: metadata.deletion_date,
            pending_window_in_days: days,
        })
    }

    /// CancelKeyDeletion.
    pub async fn cancel_key_deletion(
        &self,
        caller: &CallerContext,
        request: KeyRequest,
    ) -> Result<KeyIdResponse, ApiError> {
        let metadata = self
            .transition(
                caller,
                "CancelKeyDeletion",
                &request.key_id,
                KeyTransition::CancelDeletion,
            )
            .await?;
        Ok(KeyIdResponse {
            key_id: metadata.arn,
        })
    }

    /// ImportKeyMaterial.
    pub async fn import_key_material(
        &self,
        caller: &CallerContext,
        request: ImportKeyMaterialRequest,
    ) -> Result<(), ApiError> {
        required("KeyId", &request.key_id)?;
        if request.key_material.is_empty() {
            return Err(ApiError::validation("KeyMaterial is required"));
        }
        let expiration_model = parse_or(
            "ExpirationModel",
            request.expiration_model.as_deref(),
            ExpirationModel::KeyMaterialDoesNotExpire,
        )?;

        let result = async {
            let key_id = self
                .authorize_admin(caller, &request.key_id, "ImportKeyMaterial")
                .await?;
            self.core
                .keys
                .import_key_material(&key_id, &request.key_material, expiration_model, request.valid_to)
                .await
        }
        .await;

        self.audited(
            AuditEvent::new("ImportKeyMaterial", &caller.principal),
            Some(&request.key_id),
            result,
        )
        .await
        .map(|_| ())
    }

    /// DeleteImportedKeyMaterial.
    pub async fn delete_imported_key_material(
        &self,
        caller: &CallerContext,
        request: KeyRequest,
    ) -> Result<(), ApiError> {
        required("KeyId", &request.key_id)?;

        let result = async {
            let key_id = self
                .authorize_admin(caller, &request.key_id, "DeleteImportedKeyMaterial")
                .await?;
            self.core.keys.delete_imported_key_material(&key_id).await
        }
        .await;

        self.audited(
            AuditEvent::new("DeleteImportedKeyMaterial", &caller.principal),
            Some(&request.key_id),
            result,
        )
        .await
        .map(|_| ())
    }

    /// RotateKeyOnDemand.
    pub async fn rotate_key_on_demand(
        &self,
        caller: &CallerContext,
        request: KeyRequest,
    ) -> Result<KeyIdResponse, ApiError> {
        required("KeyId", &request.key_id)?;

        let result = async {
            let key_id = self
                .authorize_admin(caller, &request.key_id, "RotateKeyOnDemand")
                .await?;
            self.core.keys.rotate_key(&key_id).await
        }
        .await;

        let metadata = self
            .audited(
                AuditEvent::new("RotateKeyOnDemand", &caller.principal),
                Some(&request.key_id),
                result,
            )
            .await?;
        Ok(KeyIdResponse {
            key_id: metadata.arn,
        })
    }

    /// ReplicateKey.
    pub async fn replicate_key(
        &self,
        caller: &CallerContext,
        request: ReplicaRequest,
    ) -> Result<ReplicateKeyResponse, ApiError> {
        required("KeyId", &request.key_id)?;
        required("ReplicaRegion", &request.replica_region)?;

        let result = async {
            let key_id = self
                .authorize_admin(caller, &request.key_id, "ReplicateKey")
                .await?;
            self.core
                .keys
                .replicate_key(&key_id, &request.replica_region)
                .await
        }
        .await;

        let metadata = self
            .audited(
                AuditEvent::new("ReplicateKey", &caller.principal),
                Some(&request.key_id),
                result,
            )
            .await?;
        Ok(ReplicateKeyResponse {
            replica_key_arn: format!(
                "arn:coffer:kms:{}:{}:key/{}",
                request.replica_region, metadata.account_id, metadata.key_id
            ),
            key_metadata: (&metadata).into(),
        })
    }

    /// DeleteReplica.
    pub async fn delete_replica(
        &self,
        caller: &CallerContext,
        request: ReplicaRequest,
    ) -> Result<KeyMetadataResponse, ApiError> {
        required("KeyId", &request.key_id)?;
        required("ReplicaRegion", &request.replica_region)?;

        let result = async {
            let key_id = self
                .authorize_admin(caller, &request.key_id, "DeleteReplica")
                .await?;
            self.core
                .keys
                .delete_replica(&key_id, &request.replica_region)
                .await
        }
        .await;

        let metadata = self
            .audited(
                AuditEvent::new("DeleteReplica", &caller.principal),
                Some(&request.key_id),
                result,
            )
            .await?;
        Ok((&metadata).into())
    }

    // ========================================================================
    // Grants
    // ========================================================================

    /// CreateGrant.
    pub async fn create_grant(
        &self,
        caller: &CallerContext,
        request: CreateGrantRequest,
    ) -> Result<Outcome<CreateGrantResponse>, ApiError> {
        required("KeyId", &request.key_id)?;
        validate_tokens(&request.grant_tokens)?;
        let grantee = request
            .grantee_principal
            .as_deref()
            .map(|p| required("GranteePrincipal", p).map(Principal::new))
            .transpose()?
            .ok_or_else(|| ApiError::validation("GranteePrincipal is required"))?;
        let retiring_principal = request
            .retiring_principal
            .as_deref()
            .map(|p| required("RetiringPrincipal", p).map(Principal::new))
            .transpose()?;
        if request.operations.is_empty() {
            return Err(ApiError::validation("Operations must not be empty"));
        }
        let operations = request
            .operations
            .iter()
            .map(|op| parse::<GrantOperation>("Operations", op))
            .collect::<Result<Vec<_>, _>>()?;
        let constraints = request.constraints.map(constraints_from_dto).transpose()?.flatten();
        let dry_run = request.dry_run.unwrap_or(false);

        let params = CreateGrantParams {
            key_id: request.key_id.clone(),
            grantee: Some(grantee),
            retiring_principal,
            operations,
            constraints,
            name: request.name,
            grant_tokens: request.grant_tokens,
            dry_run,
        };
        let result = self.core.grants.create_grant(&caller.principal, params).await;

        let outcome = self
            .audited(
                AuditEvent::new("CreateGrant", &caller.principal).dry_run(dry_run),
                Some(&request.key_id),
                result,
            )
            .await?;
        Ok(outcome.map(|created| CreateGrantResponse {
            grant_id: created.grant_id,
            grant_token: created.grant_token,
        }))
    }

    /// ListGrants, optionally filtered by grant id or grantee.
    pub async fn list_grants(
        &self,
        caller: &CallerContext,
        request: ListGrantsRequest,
    ) -> Result<ListGrantsResponse, ApiError> {
        required("KeyId", &request.key_id)?;

        let result = async {
            let key_id = self
                .authorize_admin(caller, &request.key_id, "ListGrants")
                .await?;
            self.core.grants.list_grants(&key_id).await
        }
        .await;

        let grants = self
            .audited(
                AuditEvent::new("ListGrants", &caller.principal),
                Some(&request.key_id),
                result,
            )
            .await?;
        Ok(ListGrantsResponse {
            grants: grants
                .iter()
                .filter(|g| request.grant_id.as_ref().map_or(true, |id| &g.grant_id == id))
                .filter(|g| {
                    request
                        .grantee_principal
                        .as_deref()
                        .map_or(true, |p| g.grantee.as_str() == p)
                })
                .map(GrantListEntry::from)
                .collect(),
        })
    }

    /// RetireGrant, by token or by key and grant id.
    pub async fn retire_grant(
        &self,
        caller: &CallerContext,
        request: RetireGrantRequest,
    ) -> Result<Outcome<()>, ApiError> {
        if request.grant_token.is_none() && request.grant_id.is_none() {
            return Err(ApiError::validation("either GrantToken or GrantId is required"));
        }
        let dry_run = request.dry_run.unwrap_or(false);
        let key_ref = request.key_id.clone();

        let result = self
            .core
            .grants
            .retire_grant(
                &caller.principal,
                RetireGrantParams {
                    grant_token: request.grant_token,
                    key_id: request.key_id,
                    grant_id: request.grant_id,
                    dry_run,
                },
            )
            .await;

        self.audited(
            AuditEvent::new("RetireGrant", &caller.principal).dry_run(dry_run),
            key_ref.as_deref(),
            result,
        )
        .await
    }

    /// RevokeGrant.
    pub async fn revoke_grant(
        &self,
        caller: &CallerContext,
        request: RevokeGrantRequest,
    ) -> Result<Outcome<()>, ApiError> {
        required("KeyId", &request.key_id)?;
        required("GrantId", &request.grant_id)?;
        let dry_run = request.dry_run.unwrap_or(false);

        let result = self
            .core
            .grants
            .revoke_grant(&caller.principal, &request.key_id, &request.grant_id, dry_run)
            .await;

        self.audited(
            AuditEvent::new("RevokeGrant", &caller.principal).dry_run(dry_run),
            Some(&request.key_id),
            result,
        )
        .await
    }

    // ========================================================================
    // Cryptographic operations
    // ========================================================================

    /// GenerateDataKey.
    pub async fn generate_data_key(
        &self,
        caller: &CallerContext,
        request: GenerateDataKeyRequest,
    ) -> Result<Outcome<GenerateDataKeyResponse>, ApiError> {
        let params = data_key_params(request)?;
        let outcome = self
            .core
            .envelope
            .generate_data_key(&caller.principal, params)
            .await?;

        Ok(outcome.map(|key| GenerateDataKeyResponse {
            key_id: self.arn(&key.key_id),
            plaintext: key.plaintext,
            ciphertext_blob: key.ciphertext_blob,
        }))
    }

    /// GenerateDataKeyWithoutPlaintext.
    pub async fn generate_data_key_without_plaintext(
        &self,
        caller: &CallerContext,
        request: GenerateDataKeyRequest,
    ) -> Result<Outcome<GenerateDataKeyWithoutPlaintextResponse>, ApiError> {
        let params = data_key_params(request)?;
        let outcome = self
            .core
            .envelope
            .generate_data_key_without_plaintext(&caller.principal, params)
            .await?;

        Ok(outcome.map(|key| GenerateDataKeyWithoutPlaintextResponse {
            key_id: self.arn(&key.key_id),
            ciphertext_blob: key.ciphertext_blob,
        }))
    }

    /// Encrypt.
    pub async fn encrypt(
        &self,
        caller: &CallerContext,
        request: EncryptRequest,
    ) -> Result<Outcome<EncryptResponse>, ApiError> {
        required("KeyId", &request.key_id)?;
        validate_tokens(&request.grant_tokens)?;
        if request.plaintext.is_empty() || request.plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(ApiError::validation(format!(
                "Plaintext must be 1 to {MAX_PLAINTEXT_LEN} bytes"
            )));
        }
        validate_context("EncryptionContext", &request.encryption_context)?;

        let params = EncryptParams {
            key_id: request.key_id,
            plaintext: request.plaintext,
            encryption_context: request.encryption_context,
            algorithm: algorithm("EncryptionAlgorithm", request.encryption_algorithm.as_deref())?,
            grant_tokens: request.grant_tokens,
            dry_run: request.dry_run.unwrap_or(false),
        };
        let outcome = self.core.envelope.encrypt(&caller.principal, params).await?;

        Ok(outcome.map(|encrypted| EncryptResponse {
            key_id: self.arn(&encrypted.key_id),
            ciphertext_blob: encrypted.ciphertext_blob,
            encryption_algorithm: encrypted.algorithm.to_string(),
        }))
    }

    /// Decrypt.
    pub async fn decrypt(
        &self,
        caller: &CallerContext,
        request: DecryptRequest,
    ) -> Result<Outcome<DecryptResponse>, ApiError> {
        validate_blob(&request.ciphertext_blob)?;
        validate_tokens(&request.grant_tokens)?;
        validate_context("EncryptionContext", &request.encryption_context)?;
        if let Some(key_id) = &request.key_id {
            required("KeyId", key_id)?;
        }

        let params = DecryptParams {
            ciphertext_blob: request.ciphertext_blob,
            key_id: request.key_id,
            encryption_context: request.encryption_context,
            algorithm: algorithm("EncryptionAlgorithm", request.encryption_algorithm.as_deref())?,
            grant_tokens: request.grant_tokens,
            dry_run: request.dry_run.unwrap_or(false),
        };
        let outcome = self.core.envelope.decrypt(&caller.principal, params).await?;

        Ok(outcome.map(|decrypted| DecryptResponse {
            key_id: self.arn(&decrypted.key_id),
            plaintext: decrypted.plaintext,
            encryption_algorithm: decrypted.algorithm.to_string(),
        }))
    }

    /// ReEncrypt.
    pub async fn re_encrypt(
        &self,
        caller: &CallerContext,
        request: ReEncryptRequest,
    ) -> Result<Outcome<ReEncryptResponse>, ApiError> {
        validate_blob(&request.ciphertext_blob)?;
        required("DestinationKeyId", &request.destination_key_id)?;
        validate_tokens(&request.grant_tokens)?;
        validate_context("SourceEncryptionContext", &request.source_encryption_context)?;
        validate_context(
            "DestinationEncryptionContext",
            &request.destination_encryption_context,
        )?;
        if let Some(key_id) = &request.source_key_id {
            required("SourceKeyId", key_id)?;
        }

        let params = ReEncryptParams {
            ciphertext_blob: request.ciphertext_blob,
            source_key_id: request.source_key_id,
            source_context: request.source_encryption_context,
            source_algorithm: algorithm(
                "SourceEncryptionAlgorithm",
                request.source_encryption_algorithm.as_deref(),
            )?,
            destination_key_id: request.destination_key_id,
            destination_context: request.destination_encryption_context,
            destination_algorithm: algorithm(
                "DestinationEncryptionAlgorithm",
                request.destination_encryption_algorithm.as_deref(),
            )?,
            grant_tokens: request.grant_tokens,
            dry_run: request.dry_run.unwrap_or(false),
        };
        let outcome = self.core.envelope.re_encrypt(&caller.principal, params).await?;

        Ok(outcome.map(|moved| ReEncryptResponse {
            source_key_id: self.arn(&moved.source_key_id),
            key_id: self.arn(&moved.key_id),
            ciphertext_blob: moved.ciphertext_blob,
            source_encryption_algorithm: moved.source_algorithm.to_string(),
            destination_encryption_algorithm: moved.destination_algorithm.to_string(),
        }))
    }

    /// GenerateMac.
    pub async fn generate_mac(
        &self,
        caller: &CallerContext,
        request: GenerateMacRequest,
    ) -> Result<Outcome<GenerateMacResponse>, ApiError> {
        required("KeyId", &request.key_id)?;
        validate_tokens(&request.grant_tokens)?;
        let algorithm = parse::<MacAlgorithmSpec>("MacAlgorithm", &request.mac_algorithm)?;

        let params = GenerateMacParams {
            key_id: request.key_id,
            message: request.message,
            algorithm,
            grant_tokens: request.grant_tokens,
            dry_run: request.dry_run.unwrap_or(false),
        };
        let outcome = self.core.envelope.generate_mac(&caller.principal, params).await?;

        Ok(outcome.map(|mac| GenerateMacResponse {
            key_id: self.arn(&mac.key_id),
            mac: mac.mac,
            mac_algorithm: mac.algorithm.to_string(),
        }))
    }

    /// VerifyMac.
    pub async fn verify_mac(
        &self,
        caller: &CallerContext,
        request: VerifyMacRequest,
    ) -> Result<Outcome<VerifyMacResponse>, ApiError> {
        required("KeyId", &request.key_id)?;
        validate_tokens(&request.grant_tokens)?;
        let algorithm = parse::<MacAlgorithmSpec>("MacAlgorithm", &request.mac_algorithm)?;

        let params = VerifyMacParams {
            key_id: request.key_id,
            message: request.message,
            mac: request.mac,
            algorithm,
            grant_tokens: request.grant_tokens,
            dry_run: request.dry_run.unwrap_or(false),
        };
        let outcome = self.core.envelope.verify_mac(&caller.principal, params).await?;

        Ok(outcome.map(|verification| VerifyMacResponse {
            key_id: self.arn(&verification.key_id),
            mac_valid: verification.mac_valid,
            mac_algorithm: verification.algorithm.to_string(),
        }))
    }

    // ========================================================================
    // Host
    // ========================================================================

    /// Deletes keys whose waiting period ended and expires imported material.
    pub async fn purge_expired(&self, now: u64) -> Result<PurgeReport, ApiError> {
        Ok(self.core.purge_expired(now).await?)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn config(&self) -> &KmsConfig {
        self.core.keys.config()
    }

    fn arn(&self, key_id: &str) -> String {
        self.config().key_arn(key_id)
    }

    async fn authorize_admin(
        &self,
        caller: &CallerContext,
        key_ref: &str,
        operation: &str,
    ) -> Result<String, KmsError> {
        self.core
            .keys
            .authorize_policy(key_ref, &caller.principal, &format!("kms:{operation}"))
            .await
    }

    async fn transition(
        &self,
        caller: &CallerContext,
        operation: &'static str,
        key_ref: &str,
        transition: KeyTransition,
    ) -> Result<KeyMetadata, ApiError> {
        required("KeyId", key_ref)?;

        let result = async {
            let key_id = self.authorize_admin(caller, key_ref, operation).await?;
            self.core.keys.set_state(&key_id, transition).await
        }
        .await;

        self.audited(AuditEvent::new(operation, &caller.principal), Some(key_ref), result)
            .await
    }

    /// Records `event` with the outcome of `result` and converts the error.
    async fn audited<T>(
        &self,
        event: AuditEvent,
        key_ref: Option<&str>,
        result: Result<T, KmsError>,
    ) -> Result<T, ApiError> {
        let mut event = event.outcome(&result);
        if let Some(key_ref) = key_ref {
            let key_id = match self.core.keys.describe(key_ref).await {
                Ok(metadata) => metadata.key_id,
                Err(_) => key_ref.to_string(),
            };
            event = event.key(key_id);
        }
        self.core.audit.record(event).await;
        result.map_err(ApiError::from)
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    if value.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    if value.len() > MAX_KEY_REF_LEN {
        return Err(ApiError::validation(format!(
            "{field} exceeds {MAX_KEY_REF_LEN} characters"
        )));
    }
    Ok(value)
}

fn parse<T: FromStr<Err = KmsError>>(field: &str, value: &str) -> Result<T, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::validation(format!("{field}: unrecognized value {value:?}")))
}

fn parse_or<T: FromStr<Err = KmsError>>(
    field: &str,
    value: Option<&str>,
    default: T,
) -> Result<T, ApiError> {
    value.map_or(Ok(default), |v| parse(field, v))
}

fn algorithm(field: &str, value: Option<&str>) -> Result<EncryptionAlgorithm, ApiError> {
    parse_or(field, value, EncryptionAlgorithm::SymmetricDefault)
}

fn validate_tokens(tokens: &[String]) -> Result<(), ApiError> {
    if tokens.len() > MAX_GRANT_TOKENS {
        return Err(ApiError::validation(format!(
            "GrantTokens accepts at most {MAX_GRANT_TOKENS} tokens"
        )));
    }
    Ok(())
}

fn validate_blob(blob: &[u8]) -> Result<(), ApiError> {
    if blob.is_empty() || blob.len() > MAX_BLOB_LEN {
        return Err(ApiError::validation(format!(
            "CiphertextBlob must be 1 to {MAX_BLOB_LEN} bytes"
        )));
    }
    Ok(())
}

fn validate_context(field: &str, context: &EncryptionContext) -> Result<(), ApiError> {
    if context.len() > MAX_CONTEXT_PAIRS {
        return Err(ApiError::validation(format!(
            "{field} accepts at most {MAX_CONTEXT_PAIRS} pairs"
        )));
    }
    if context.byte_len() > MAX_CONTEXT_BYTES {
        return Err(ApiError::validation(format!(
            "{field} exceeds {MAX_CONTEXT_BYTES} bytes"
        )));
    }
    Ok(())
}

fn constraints_from_dto(dto: GrantConstraintsDto) -> Result<Option<GrantConstraints>, ApiError> {
    for ctx in [&dto.encryption_context_equals, &dto.encryption_context_subset]
        .into_iter()
        .flatten()
    {
        validate_context("Constraints", ctx)?;
    }
    match (dto.encryption_context_equals, dto.encryption_context_subset) {
        (Some(_), Some(_)) => Err(ApiError::validation(
            "Constraints accepts EncryptionContextEquals or EncryptionContextSubset, not both",
        )),
        (Some(ctx), None) => Ok(Some(GrantConstraints::EncryptionContextEquals(ctx))),
        (None, Some(ctx)) => Ok(Some(GrantConstraints::EncryptionContextSubset(ctx))),
        (None, None) => Ok(None),
    }
}

fn data_key_params(request: GenerateDataKeyRequest) -> Result<GenerateDataKeyParams, ApiError> {
    required("KeyId", &request.key_id)?;
    validate_tokens(&request.grant_tokens)?;
    validate_context("EncryptionContext", &request.encryption_context)?;

    let length = match (request.key_spec.as_deref(), request.number_of_bytes) {
        (Some(spec), None) => DataKeyLength::Spec(parse::<DataKeySpec>("KeySpec", spec)?),
        (None, Some(bytes)) => DataKeyLength::Bytes(bytes),
        (Some(_), Some(_)) => {
            return Err(ApiError::validation(
                "KeySpec and NumberOfBytes are mutually exclusive",
            ));
        },
        (None, None) => {
            return Err(ApiError::validation("one of KeySpec or NumberOfBytes is required"));
        },
    };

    Ok(GenerateDataKeyParams {
        key_id: request.key_id,
        length,
        encryption_context: request.encryption_context,
        grant_tokens: request.grant_tokens,
        dry_run: request.dry_run.unwrap_or(false),
    })
}
