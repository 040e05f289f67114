//! # Coffer KMS Engine
//!
//! Envelope-encryption key management core.
//!
//! ## Components
//!
//! - [`KeyStore`]: master keys, their lifecycle and sealed persistence
//! - [`GrantTable`]: grants, grant tokens and authorization
//! - [`EnvelopeEngine`]: data keys, encrypt/decrypt, re-encryption and MACs
//! - [`KeyPolicy`]: IAM-style key policies
//! - [`AuditLog`]: bounded trail of every cryptographic attempt
//!
//! [`KmsCore`] wires the components together over one storage backend and
//! one root key.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod blob;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod grants;
pub mod keystore;
pub mod policy;
pub mod token;
pub mod types;

pub use audit::{AuditEvent, AuditLog, AuditOutcome};
pub use config::KmsConfig;
pub use context::{EncryptionContext, GrantConstraints};
pub use envelope::{
    DataKey, DecryptParams, Decrypted, EncryptParams, Encrypted, EnvelopeEngine,
    GenerateDataKeyParams, GenerateMacParams, MacOutput, MacVerification, ReEncryptParams,
    ReEncrypted, VerifyMacParams, WrappedDataKey,
};
pub use error::KmsError;
pub use grants::{
    CreateGrantParams, CreatedGrant, Grant, GrantOperation, GrantTable, RetireGrantParams,
};
pub use keystore::{CreateKeyParams, KeyStore, KeyTransition, PurgeReport};
pub use policy::KeyPolicy;
pub use types::{
    DataKeyLength, DataKeySpec, EncryptionAlgorithm, ExpirationModel, KeyMetadata, KeySpec,
    KeyState, KeyUsage, MacAlgorithmSpec, Origin, Outcome, Principal,
};

use std::sync::Arc;

use tracing::{info, warn};

use coffer_crypto::RootKey;
use coffer_storage::StorageBackend;

/// The assembled KMS core.
#[derive(Debug, Clone)]
pub struct KmsCore {
    /// Master keys.
    pub keys: Arc<KeyStore>,
    /// Grants on those keys.
    pub grants: Arc<GrantTable>,
    /// Cryptographic operations.
    pub envelope: Arc<EnvelopeEngine>,
    /// Audit trail.
    pub audit: Arc<AuditLog>,
}

impl KmsCore {
    /// Opens every component over `backend`, loading persisted state.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        root_key: RootKey,
        config: KmsConfig,
    ) -> Result<Self, KmsError> {
        let root_key = Arc::new(root_key);
        let audit = Arc::new(AuditLog::new(config.audit_capacity));
        let keys = Arc::new(KeyStore::open(backend.clone(), root_key.clone(), config).await?);
        let grants = Arc::new(GrantTable::open(backend, keys.clone(), &root_key).await?);
        let envelope = Arc::new(EnvelopeEngine::new(
            keys.clone(),
            grants.clone(),
            audit.clone(),
        ));

        info!(region = %keys.config().region, "kms core ready");
        Ok(Self {
            keys,
            grants,
            envelope,
            audit,
        })
    }

    /// Deletes keys whose waiting period elapsed, along with their grants, and
    /// expires imported material past its `valid_to`.
    pub async fn purge_expired(&self, now: u64) -> Result<PurgeReport, KmsError> {
        let report = self.keys.purge_expired(now).await?;
        for key_id in &report.deleted {
            let grants = self.grants.purge_key(key_id).await?;
            warn!(key_id = %key_id, grants, "key deleted");
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use coffer_storage::MemoryBackend;

    #[tokio::test]
    async fn test_purge_drops_key_and_grants() {
        let core = KmsCore::open(
            Arc::new(MemoryBackend::new()),
            RootKey::generate(),
            KmsConfig::default(),
        )
        .await
        .unwrap();
        let owner = Principal::new("arn:coffer:iam::000000000000:user/owner");

        let key = core
            .keys
            .create(&owner, CreateKeyParams::default())
            .await
            .unwrap();
        core.grants
            .create_grant(
                &owner,
                CreateGrantParams {
                    key_id: key.key_id.clone(),
                    grantee: Some(Principal::new("arn:coffer:iam::000000000000:role/app")),
                    operations: vec![GrantOperation::Decrypt],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let scheduled = core
            .keys
            .set_state(
                &key.key_id,
                KeyTransition::ScheduleDeletion {
                    pending_window_days: Some(7),
                },
            )
            .await
            .unwrap();

        let deletion_date = scheduled.deletion_date.unwrap();
        let report = core.purge_expired(deletion_date - 1).await.unwrap();
        assert!(report.deleted.is_empty());

        let report = core.purge_expired(deletion_date).await.unwrap();
        assert_eq!(report.deleted, vec![key.key_id.clone()]);
        assert!(matches!(
            core.keys.describe(&key.key_id).await,
            Err(KmsError::KeyNotFound(_))
        ));
        assert!(core.grants.list_grants(&key.key_id).await.is_err());
    }
}
