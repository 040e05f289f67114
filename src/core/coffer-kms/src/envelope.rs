//! Envelope encryption: data keys, encrypt/decrypt, re-encryption and MACs.
//!
//! Every operation follows the same path under the key's read lock:
//! authorize, check the key supports the operation, require Enabled, stop
//! there for a dry run, then touch the material. Each attempt is audited.

use std::sync::Arc;

use zeroize::Zeroizing;

use coffer_crypto::{mac, random, CryptoError, MacAlgorithm};

use crate::audit::{AuditEvent, AuditLog};
use crate::blob::{self, BlobHeader, MAX_BLOB_LEN};
use crate::context::EncryptionContext;
use crate::error::KmsError;
use crate::grants::{validate_tokens, GrantOperation, GrantTable};
use crate::keystore::{KeyEntry, KeyStore};
use crate::types::{
    DataKeyLength, EncryptionAlgorithm, KeyMetadata, KeySpec, KeyState, KeyUsage,
    MacAlgorithmSpec, Outcome, Principal,
};

/// Largest plaintext accepted by [`EnvelopeEngine::encrypt`].
pub const MAX_PLAINTEXT_LEN: usize = 4096;

/// Largest message accepted by the MAC operations.
pub const MAX_MAC_MESSAGE_LEN: usize = 4096;

// ============================================================================
// Parameters and results
// ============================================================================

/// Parameters of [`EnvelopeEngine::generate_data_key`] and
/// [`EnvelopeEngine::generate_data_key_without_plaintext`].
#[derive(Debug, Clone)]
pub struct GenerateDataKeyParams {
    /// Master key id or ARN.
    pub key_id: String,
    /// Requested length.
    pub length: DataKeyLength,
    /// Context bound to the wrapped key.
    pub encryption_context: EncryptionContext,
    /// Grant tokens proving entitlement.
    pub grant_tokens: Vec<String>,
    /// Check only; generate nothing.
    pub dry_run: bool,
}

/// A fresh data key in plaintext and wrapped form.
pub struct DataKey {
    /// Master key that wrapped the data key.
    pub key_id: String,
    /// Plaintext data key. Owned by the caller.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Data key wrapped under the master key.
    pub ciphertext_blob: Vec<u8>,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("key_id", &self.key_id)
            .field("plaintext", &"[REDACTED]")
            .field("ciphertext_blob_len", &self.ciphertext_blob.len())
            .finish()
    }
}

/// A data key in wrapped form only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedDataKey {
    /// Master key that wrapped the data key.
    pub key_id: String,
    /// Data key wrapped under the master key.
    pub ciphertext_blob: Vec<u8>,
}

/// Parameters of [`EnvelopeEngine::encrypt`].
#[derive(Clone)]
pub struct EncryptParams {
    /// Master key id or ARN.
    pub key_id: String,
    /// Data to encrypt (1..=4096 bytes).
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Context bound to the ciphertext.
    pub encryption_context: EncryptionContext,
    /// Encryption algorithm.
    pub algorithm: EncryptionAlgorithm,
    /// Grant tokens proving entitlement.
    pub grant_tokens: Vec<String>,
    /// Check only; encrypt nothing.
    pub dry_run: bool,
}

impl std::fmt::Debug for EncryptParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptParams")
            .field("key_id", &self.key_id)
            .field("plaintext", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Output of [`EnvelopeEngine::encrypt`] and [`EnvelopeEngine::re_encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    /// Master key that produced the ciphertext.
    pub key_id: String,
    /// Ciphertext blob.
    pub ciphertext_blob: Vec<u8>,
    /// Algorithm used.
    pub algorithm: EncryptionAlgorithm,
}

/// Parameters of [`EnvelopeEngine::decrypt`].
#[derive(Debug, Clone)]
pub struct DecryptParams {
    /// Ciphertext blob.
    pub ciphertext_blob: Vec<u8>,
    /// Expected master key; must match the key embedded in the blob.
    pub key_id: Option<String>,
    /// Context the blob was bound to.
    pub encryption_context: EncryptionContext,
    /// Encryption algorithm.
    pub algorithm: EncryptionAlgorithm,
    /// Grant tokens proving entitlement.
    pub grant_tokens: Vec<String>,
    /// Check only; decrypt nothing.
    pub dry_run: bool,
}

/// Output of [`EnvelopeEngine::decrypt`].
pub struct Decrypted {
    /// Master key that produced the ciphertext.
    pub key_id: String,
    /// Recovered plaintext.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Algorithm used.
    pub algorithm: EncryptionAlgorithm,
}

impl std::fmt::Debug for Decrypted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decrypted")
            .field("key_id", &self.key_id)
            .field("plaintext", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Parameters of [`EnvelopeEngine::re_encrypt`].
#[derive(Debug, Clone)]
pub struct ReEncryptParams {
    /// Ciphertext blob to move.
    pub ciphertext_blob: Vec<u8>,
    /// Expected source key; must match the key embedded in the blob.
    pub source_key_id: Option<String>,
    /// Context the blob is bound to.
    pub source_context: EncryptionContext,
    /// Algorithm the blob was produced with.
    pub source_algorithm: EncryptionAlgorithm,
    /// Destination key id or ARN.
    pub destination_key_id: String,
    /// Context to bind the new blob to.
    pub destination_context: EncryptionContext,
    /// Algorithm for the new blob.
    pub destination_algorithm: EncryptionAlgorithm,
    /// Grant tokens proving entitlement on either key.
    pub grant_tokens: Vec<String>,
    /// Check only; move nothing.
    pub dry_run: bool,
}

/// Output of [`EnvelopeEngine::re_encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReEncrypted {
    /// Key the blob came from.
    pub source_key_id: String,
    /// Key the new blob is wrapped under.
    pub key_id: String,
    /// New ciphertext blob.
    pub ciphertext_blob: Vec<u8>,
    /// Algorithm of the source blob.
    pub source_algorithm: EncryptionAlgorithm,
    /// Algorithm of the new blob.
    pub destination_algorithm: EncryptionAlgorithm,
}

/// Parameters of [`EnvelopeEngine::generate_mac`].
#[derive(Debug, Clone)]
pub struct GenerateMacParams {
    /// HMAC key id or ARN.
    pub key_id: String,
    /// Message (1..=4096 bytes).
    pub message: Vec<u8>,
    /// MAC algorithm; must match the key spec.
    pub algorithm: MacAlgorithmSpec,
    /// Grant tokens proving entitlement.
    pub grant_tokens: Vec<String>,
    /// Check only; compute nothing.
    pub dry_run: bool,
}

/// Output of [`EnvelopeEngine::generate_mac`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacOutput {
    /// HMAC key used.
    pub key_id: String,
    /// Tag.
    pub mac: Vec<u8>,
    /// Algorithm used.
    pub algorithm: MacAlgorithmSpec,
}

/// Parameters of [`EnvelopeEngine::verify_mac`].
#[derive(Debug, Clone)]
pub struct VerifyMacParams {
    /// HMAC key id or ARN.
    pub key_id: String,
    /// Message (1..=4096 bytes).
    pub message: Vec<u8>,
    /// Tag to check.
    pub mac: Vec<u8>,
    /// MAC algorithm; must match the key spec.
    pub algorithm: MacAlgorithmSpec,
    /// Grant tokens proving entitlement.
    pub grant_tokens: Vec<String>,
    /// Check only; verify nothing.
    pub dry_run: bool,
}

/// Output of [`EnvelopeEngine::verify_mac`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacVerification {
    /// HMAC key used.
    pub key_id: String,
    /// Whether the tag matched.
    pub mac_valid: bool,
    /// Algorithm used.
    pub algorithm: MacAlgorithmSpec,
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Family {
    Envelope(EncryptionAlgorithm),
    Mac(MacAlgorithmSpec),
}

struct Check<'a> {
    operation: &'static str,
    caller: &'a Principal,
    key_ref: &'a str,
    allowed: &'a [GrantOperation],
    context: &'a EncryptionContext,
    tokens: &'a [String],
    dry_run: bool,
    family: Family,
}

/// What an attempt touched, for the audit record.
#[derive(Default)]
struct Attempt {
    key_id: Option<String>,
    material_used: bool,
}

/// Cryptographic operations under master keys.
#[derive(Debug)]
pub struct EnvelopeEngine {
    keys: Arc<KeyStore>,
    grants: Arc<GrantTable>,
    audit: Arc<AuditLog>,
}

impl EnvelopeEngine {
    /// Creates an engine over the given store, grants and audit log.
    pub fn new(keys: Arc<KeyStore>, grants: Arc<GrantTable>, audit: Arc<AuditLog>) -> Self {
        Self {
            keys,
            grants,
            audit,
        }
    }

    /// Generates a data key and wraps it under the master key.
    pub async fn generate_data_key(
        &self,
        caller: &Principal,
        params: GenerateDataKeyParams,
    ) -> Result<Outcome<DataKey>, KmsError> {
        let mut attempt = Attempt::default();
        let result = self
            .data_key(caller, &params, GrantOperation::GenerateDataKey, &mut attempt)
            .await;
        self.record("GenerateDataKey", caller, params.dry_run, attempt, &result)
            .await;
        result
    }

    /// Same as [`Self::generate_data_key`], returning only the wrapped key.
    pub async fn generate_data_key_without_plaintext(
        &self,
        caller: &Principal,
        params: GenerateDataKeyParams,
    ) -> Result<Outcome<WrappedDataKey>, KmsError> {
        let mut attempt = Attempt::default();
        let result = self
            .data_key(
                caller,
                &params,
                GrantOperation::GenerateDataKeyWithoutPlaintext,
                &mut attempt,
            )
            .await
            .map(|outcome| {
                outcome.map(|key| WrappedDataKey {
                    key_id: key.key_id,
                    ciphertext_blob: key.ciphertext_blob,
                })
            });
        self.record(
            "GenerateDataKeyWithoutPlaintext",
            caller,
            params.dry_run,
            attempt,
            &result,
        )
        .await;
        result
    }

    /// Encrypts up to 4096 bytes directly under the master key.
    pub async fn encrypt(
        &self,
        caller: &Principal,
        params: EncryptParams,
    ) -> Result<Outcome<Encrypted>, KmsError> {
        let mut attempt = Attempt::default();
        let result = self.encrypt_inner(caller, &params, &mut attempt).await;
        self.record("Encrypt", caller, params.dry_run, attempt, &result)
            .await;
        result
    }

    /// Decrypts a blob produced by this engine.
    pub async fn decrypt(
        &self,
        caller: &Principal,
        params: DecryptParams,
    ) -> Result<Outcome<Decrypted>, KmsError> {
        let mut attempt = Attempt::default();
        let result = self.decrypt_inner(caller, &params, &mut attempt).await;
        self.record("Decrypt", caller, params.dry_run, attempt, &result)
            .await;
        result
    }

    /// Moves a blob from its source key to a destination key.
    ///
    /// The source is decrypted and the destination encrypted under separate,
    /// successive key locks. The intermediate plaintext is zeroized on drop and
    /// never leaves this call.
    pub async fn re_encrypt(
        &self,
        caller: &Principal,
        params: ReEncryptParams,
    ) -> Result<Outcome<ReEncrypted>, KmsError> {
        let mut source = Attempt::default();
        let plaintext = self.re_encrypt_source(caller, &params, &mut source).await;
        let source_id = source.key_id.clone();
        self.record("ReEncrypt", caller, params.dry_run, source, &plaintext)
            .await;
        let plaintext = plaintext?;

        let mut destination = Attempt::default();
        let result = self
            .checked(
                &mut destination,
                Check {
                    operation: "ReEncryptTo",
                    caller,
                    key_ref: &params.destination_key_id,
                    allowed: &[GrantOperation::Encrypt, GrantOperation::ReEncryptTo],
                    context: &params.destination_context,
                    tokens: &params.grant_tokens,
                    dry_run: params.dry_run,
                    family: Family::Envelope(params.destination_algorithm),
                },
                |entry| {
                    let plaintext = plaintext.completed().ok_or_else(|| {
                        KmsError::Validation("re-encrypt source produced no plaintext".into())
                    })?;
                    let ciphertext_blob =
                        wrap_current(entry, &plaintext, &params.destination_context)?;
                    Ok(ReEncrypted {
                        source_key_id: source_id.clone().unwrap_or_default(),
                        key_id: entry.metadata.key_id.clone(),
                        ciphertext_blob,
                        source_algorithm: params.source_algorithm,
                        destination_algorithm: params.destination_algorithm,
                    })
                },
            )
            .await;
        self.record("ReEncrypt", caller, params.dry_run, destination, &result)
            .await;
        result
    }

    /// Computes an HMAC under an HMAC key.
    pub async fn generate_mac(
        &self,
        caller: &Principal,
        params: GenerateMacParams,
    ) -> Result<Outcome<MacOutput>, KmsError> {
        let mut attempt = Attempt::default();
        let result = self.generate_mac_inner(caller, &params, &mut attempt).await;
        self.record("GenerateMac", caller, params.dry_run, attempt, &result)
            .await;
        result
    }

    /// Checks an HMAC under an HMAC key.
    pub async fn verify_mac(
        &self,
        caller: &Principal,
        params: VerifyMacParams,
    ) -> Result<Outcome<MacVerification>, KmsError> {
        let mut attempt = Attempt::default();
        let result = self.verify_mac_inner(caller, &params, &mut attempt).await;
        self.record("VerifyMac", caller, params.dry_run, attempt, &result)
            .await;
        result
    }

    // ------------------------------------------------------------------------
    // Operation bodies
    // ------------------------------------------------------------------------

    async fn data_key(
        &self,
        caller: &Principal,
        params: &GenerateDataKeyParams,
        operation: GrantOperation,
        attempt: &mut Attempt,
    ) -> Result<Outcome<DataKey>, KmsError> {
        let len = params.length.byte_len()?;

        self.checked(
            attempt,
            Check {
                operation: operation.as_str(),
                caller,
                key_ref: &params.key_id,
                allowed: &[operation],
                context: &params.encryption_context,
                tokens: &params.grant_tokens,
                dry_run: params.dry_run,
                family: Family::Envelope(EncryptionAlgorithm::SymmetricDefault),
            },
            |entry| {
                let plaintext = random::generate_secret(len);
                let ciphertext_blob = wrap_current(entry, &plaintext, &params.encryption_context)?;
                Ok(DataKey {
                    key_id: entry.metadata.key_id.clone(),
                    plaintext,
                    ciphertext_blob,
                })
            },
        )
        .await
    }

    async fn encrypt_inner(
        &self,
        caller: &Principal,
        params: &EncryptParams,
        attempt: &mut Attempt,
    ) -> Result<Outcome<Encrypted>, KmsError> {
        if params.plaintext.is_empty() || params.plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(KmsError::Validation(format!(
                "plaintext must be 1..={MAX_PLAINTEXT_LEN} bytes, got {}",
                params.plaintext.len()
            )));
        }

        self.checked(
            attempt,
            Check {
                operation: "Encrypt",
                caller,
                key_ref: &params.key_id,
                allowed: &[GrantOperation::Encrypt],
                context: &params.encryption_context,
                tokens: &params.grant_tokens,
                dry_run: params.dry_run,
                family: Family::Envelope(params.algorithm),
            },
            |entry| {
                Ok(Encrypted {
                    key_id: entry.metadata.key_id.clone(),
                    ciphertext_blob: wrap_current(
                        entry,
                        &params.plaintext,
                        &params.encryption_context,
                    )?,
                    algorithm: params.algorithm,
                })
            },
        )
        .await
    }

    async fn decrypt_inner(
        &self,
        caller: &Principal,
        params: &DecryptParams,
        attempt: &mut Attempt,
    ) -> Result<Outcome<Decrypted>, KmsError> {
        let parsed = parse_blob(&params.ciphertext_blob)?;
        let key_id = parsed.header.key_id.clone();
        attempt.key_id = Some(key_id.clone());
        self.ensure_expected_key(params.key_id.as_deref(), &key_id)
            .await?;

        self.checked(
            attempt,
            Check {
                operation: "Decrypt",
                caller,
                key_ref: &key_id,
                allowed: &[GrantOperation::Decrypt],
                context: &params.encryption_context,
                tokens: &params.grant_tokens,
                dry_run: params.dry_run,
                family: Family::Envelope(params.algorithm),
            },
            |entry| {
                let material = entry
                    .material(parsed.header.material_version)
                    .ok_or(KmsError::InvalidCiphertext)?;
                Ok(Decrypted {
                    key_id: entry.metadata.key_id.clone(),
                    plaintext: blob::unwrap(material.as_bytes(), &parsed, &params.encryption_context)?,
                    algorithm: params.algorithm,
                })
            },
        )
        .await
    }

    async fn re_encrypt_source(
        &self,
        caller: &Principal,
        params: &ReEncryptParams,
        attempt: &mut Attempt,
    ) -> Result<Outcome<Zeroizing<Vec<u8>>>, KmsError> {
        let parsed = parse_blob(&params.ciphertext_blob)?;
        let key_id = parsed.header.key_id.clone();
        attempt.key_id = Some(key_id.clone());
        self.ensure_expected_key(params.source_key_id.as_deref(), &key_id)
            .await?;

        self.checked(
            attempt,
            Check {
                operation: "ReEncryptFrom",
                caller,
                key_ref: &key_id,
                allowed: &[GrantOperation::Decrypt, GrantOperation::ReEncryptFrom],
                context: &params.source_context,
                tokens: &params.grant_tokens,
                dry_run: params.dry_run,
                family: Family::Envelope(params.source_algorithm),
            },
            |entry| {
                let material = entry
                    .material(parsed.header.material_version)
                    .ok_or(KmsError::InvalidCiphertext)?;
                blob::unwrap(material.as_bytes(), &parsed, &params.source_context)
            },
        )
        .await
    }

    async fn generate_mac_inner(
        &self,
        caller: &Principal,
        params: &GenerateMacParams,
        attempt: &mut Attempt,
    ) -> Result<Outcome<MacOutput>, KmsError> {
        validate_mac_message(&params.message)?;

        self.checked(
            attempt,
            Check {
                operation: "GenerateMac",
                caller,
                key_ref: &params.key_id,
                allowed: &[GrantOperation::GenerateMac],
                context: &EncryptionContext::new(),
                tokens: &params.grant_tokens,
                dry_run: params.dry_run,
                family: Family::Mac(params.algorithm),
            },
            |entry| {
                let (_, material) = current_material(entry)?;
                Ok(MacOutput {
                    key_id: entry.metadata.key_id.clone(),
                    mac: mac::compute(params.algorithm.into(), material, &params.message)?,
                    algorithm: params.algorithm,
                })
            },
        )
        .await
    }

    async fn verify_mac_inner(
        &self,
        caller: &Principal,
        params: &VerifyMacParams,
        attempt: &mut Attempt,
    ) -> Result<Outcome<MacVerification>, KmsError> {
        validate_mac_message(&params.message)?;
        if params.mac.is_empty() || params.mac.len() > 64 {
            return Err(KmsError::Validation("mac must be 1..=64 bytes".into()));
        }

        self.checked(
            attempt,
            Check {
                operation: "VerifyMac",
                caller,
                key_ref: &params.key_id,
                allowed: &[GrantOperation::VerifyMac],
                context: &EncryptionContext::new(),
                tokens: &params.grant_tokens,
                dry_run: params.dry_run,
                family: Family::Mac(params.algorithm),
            },
            |entry| {
                let (_, material) = current_material(entry)?;
                let mac_valid = match mac::verify(
                    params.algorithm.into(),
                    material,
                    &params.message,
                    &params.mac,
                ) {
                    Ok(()) => true,
                    Err(CryptoError::MacMismatch) => false,
                    Err(other) => return Err(other.into()),
                };
                Ok(MacVerification {
                    key_id: entry.metadata.key_id.clone(),
                    mac_valid,
                    algorithm: params.algorithm,
                })
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Shared path
    // ------------------------------------------------------------------------

    async fn checked<T>(
        &self,
        attempt: &mut Attempt,
        check: Check<'_>,
        action: impl FnOnce(&KeyEntry) -> Result<T, KmsError>,
    ) -> Result<Outcome<T>, KmsError> {
        validate_tokens(check.tokens)?;

        let entry = self.keys.entry(check.key_ref).await?;
        let entry = entry.read().await;
        entry.ensure_live()?;
        attempt.key_id = Some(entry.metadata.key_id.clone());

        self.grants
            .require(&entry, check.caller, check.allowed, check.context, check.tokens)
            .await?;
        ensure_supported(&entry.metadata, check.family, check.operation)?;
        if entry.metadata.state != KeyState::Enabled {
            return Err(KmsError::KeyUnavailable {
                key_id: entry.metadata.key_id.clone(),
                state: entry.metadata.state,
            });
        }

        if check.dry_run {
            return Ok(Outcome::DryRun);
        }

        attempt.material_used = true;
        action(&*entry).map(Outcome::Completed)
    }

    async fn ensure_expected_key(
        &self,
        expected: Option<&str>,
        embedded: &str,
    ) -> Result<(), KmsError> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let expected = self.keys.describe(expected).await?.key_id;
        if expected != embedded {
            return Err(KmsError::IncorrectKey {
                expected,
                actual: embedded.to_string(),
            });
        }
        Ok(())
    }

    async fn record<T>(
        &self,
        operation: &str,
        caller: &Principal,
        dry_run: bool,
        attempt: Attempt,
        result: &Result<T, KmsError>,
    ) {
        let mut event = AuditEvent::new(operation, caller)
            .dry_run(dry_run)
            .material_used(attempt.material_used)
            .outcome(result);
        event.key_id = attempt.key_id;
        self.audit.record(event).await;
    }
}

fn ensure_supported(
    metadata: &KeyMetadata,
    family: Family,
    operation: &str,
) -> Result<(), KmsError> {
    let supported = match family {
        Family::Envelope(algorithm) => {
            metadata.usage == KeyUsage::EncryptDecrypt
                && metadata.key_spec == KeySpec::SymmetricDefault
                && algorithm == EncryptionAlgorithm::SymmetricDefault
        },
        Family::Mac(algorithm) => {
            metadata.usage == KeyUsage::GenerateVerifyMac
                && metadata.key_spec.mac_algorithm() == Some(MacAlgorithm::from(algorithm))
        },
    };

    if supported {
        Ok(())
    } else {
        Err(KmsError::UnsupportedOperationForKey {
            operation: operation.to_string(),
            key_id: metadata.key_id.clone(),
        })
    }
}

fn current_material(entry: &KeyEntry) -> Result<(u32, &[u8]), KmsError> {
    entry
        .current_material()
        .map(|(version, material)| (version, material.as_bytes()))
        .ok_or_else(|| KmsError::KeyUnavailable {
            key_id: entry.metadata.key_id.clone(),
            state: entry.metadata.state,
        })
}

fn wrap_current(
    entry: &KeyEntry,
    plaintext: &[u8],
    context: &EncryptionContext,
) -> Result<Vec<u8>, KmsError> {
    let (version, material) = current_material(entry)?;
    blob::wrap(
        material,
        &BlobHeader::new(entry.metadata.key_id.clone(), version),
        plaintext,
        context,
    )
}

fn parse_blob(ciphertext_blob: &[u8]) -> Result<blob::ParsedBlob<'_>, KmsError> {
    if ciphertext_blob.len() > MAX_BLOB_LEN {
        return Err(KmsError::InvalidCiphertext);
    }
    blob::parse(ciphertext_blob)
}

fn validate_mac_message(message: &[u8]) -> Result<(), KmsError> {
    if message.is_empty() || message.len() > MAX_MAC_MESSAGE_LEN {
        return Err(KmsError::Validation(format!(
            "message must be 1..={MAX_MAC_MESSAGE_LEN} bytes, got {}",
            message.len()
        )));
    }
    Ok(())
}
