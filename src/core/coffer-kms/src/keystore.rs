//! Master key records, their lifecycle and their persistence.
//!
//! Each record lives behind its own lock. Crypto operations take the read lock
//! for their state check and crypto step; transitions take the write lock. The
//! outer map is only locked to look up, insert or remove records.
//!
//! Records are stored as JSON under `keys/{key_id}`. Key material is sealed
//! with AES-256-GCM under a key derived from the root key for that key id and
//! material version, so a record read back with another root key fails to open.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use coffer_crypto::{aead, kdf, mac, random, KeyMaterial, MacAlgorithm, RootKey};
use coffer_storage::{StorageBackend, StorageError};

use crate::config::{KmsConfig, MAX_PENDING_WINDOW_DAYS, MIN_PENDING_WINDOW_DAYS};
use crate::error::KmsError;
use crate::policy::KeyPolicy;
use crate::types::{
    unix_now, ExpirationModel, KeyMetadata, KeySpec, KeyState, KeyUsage, Origin, Principal,
};

const KEY_PREFIX: &str = "keys/";

/// Longest key description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 8192;

/// Length of imported symmetric material, in bytes.
pub const IMPORTED_MATERIAL_LEN: usize = 32;

const SECONDS_PER_DAY: u64 = 86_400;

// ============================================================================
// Parameters
// ============================================================================

/// Parameters of [`KeyStore::create`].
#[derive(Debug, Clone)]
pub struct CreateKeyParams {
    /// Policy document; the default policy applies when absent.
    pub policy: Option<String>,
    /// Free-form description.
    pub description: String,
    /// Key usage.
    pub usage: KeyUsage,
    /// Key spec.
    pub key_spec: KeySpec,
    /// Material origin.
    pub origin: Origin,
    /// Whether the key is a multi-region primary key.
    pub multi_region: bool,
    /// Skips the check that the caller can still manage the key's policy.
    pub bypass_policy_lockout_safety_check: bool,
}

impl Default for CreateKeyParams {
    fn default() -> Self {
        Self {
            policy: None,
            description: String::new(),
            usage: KeyUsage::EncryptDecrypt,
            key_spec: KeySpec::SymmetricDefault,
            origin: Origin::Internal,
            multi_region: false,
            bypass_policy_lockout_safety_check: false,
        }
    }
}

/// Explicit lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    /// Disabled -> Enabled.
    Enable,
    /// Enabled -> Disabled.
    Disable,
    /// Schedules deletion after a waiting period (7..=30 days).
    ScheduleDeletion {
        /// Waiting period; the configured default applies when absent.
        pending_window_days: Option<u32>,
    },
    /// Cancels a scheduled deletion; the key comes back Disabled.
    CancelDeletion,
}

impl KeyTransition {
    fn name(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::ScheduleDeletion { .. } => "schedule deletion of",
            Self::CancelDeletion => "cancel deletion of",
        }
    }
}

/// Keys touched by [`KeyStore::purge_expired`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Keys whose waiting period elapsed; their records are gone.
    pub deleted: Vec<String>,
    /// External keys whose imported material expired and was removed.
    pub expired_material: Vec<String>,
}

// ============================================================================
// Records
// ============================================================================

/// In-memory key record.
pub(crate) struct KeyEntry {
    pub(crate) metadata: KeyMetadata,
    pub(crate) policy: KeyPolicy,
    materials: BTreeMap<u32, KeyMaterial>,
    fingerprint: Option<String>,
    deleted: bool,
}

impl KeyEntry {
    /// Fails with `KeyNotFound` once the record has been purged.
    pub(crate) fn ensure_live(&self) -> Result<(), KmsError> {
        if self.deleted {
            return Err(KmsError::KeyNotFound(self.metadata.key_id.clone()));
        }
        Ok(())
    }

    /// Material used for new ciphertexts.
    pub(crate) fn current_material(&self) -> Option<(u32, &KeyMaterial)> {
        let version = self.metadata.current_material_version;
        self.materials.get(&version).map(|m| (version, m))
    }

    /// Material of a given version.
    pub(crate) fn material(&self, version: u32) -> Option<&KeyMaterial> {
        self.materials.get(&version)
    }

    fn has_material(&self) -> bool {
        !self.materials.is_empty()
    }
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("metadata", &self.metadata)
            .field("material_versions", &self.materials.keys().collect::<Vec<_>>())
            .field("deleted", &self.deleted)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct SealedMaterial {
    version: u32,
    sealed: String,
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    metadata: KeyMetadata,
    policy: KeyPolicy,
    materials: Vec<SealedMaterial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
}

// ============================================================================
// KeyStore
// ============================================================================

/// Owner of every master key record.
pub struct KeyStore {
    backend: Arc<dyn StorageBackend>,
    root_key: Arc<RootKey>,
    config: KmsConfig,
    entries: RwLock<HashMap<String, Arc<RwLock<KeyEntry>>>>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("region", &self.config.region)
            .field("account_id", &self.config.account_id)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Opens the store and loads every persisted record.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        root_key: Arc<RootKey>,
        config: KmsConfig,
    ) -> Result<Self, KmsError> {
        let store = Self {
            backend,
            root_key,
            config,
            entries: RwLock::new(HashMap::new()),
        };

        let mut loaded = HashMap::new();
        for path in store.backend.list(KEY_PREFIX).await? {
            let Some(bytes) = store.backend.get(&path).await? else {
                continue;
            };
            let entry = store.decode(&bytes)?;
            loaded.insert(entry.metadata.key_id.clone(), Arc::new(RwLock::new(entry)));
        }

        info!(keys = loaded.len(), "key store opened");
        *store.entries.write().await = loaded;
        Ok(store)
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &KmsConfig {
        &self.config
    }

    /// Creates a master key owned by `caller`.
    pub async fn create(
        &self,
        caller: &Principal,
        params: CreateKeyParams,
    ) -> Result<KeyMetadata, KmsError> {
        if !params.key_spec.supports_usage(params.usage) {
            return Err(KmsError::InvalidKeySpec(format!(
                "key spec {} cannot be used for {}",
                params.key_spec, params.usage
            )));
        }
        match params.origin {
            Origin::ExternalStore => {
                return Err(KmsError::Validation(
                    "no external key store is configured".into(),
                ));
            },
            Origin::External if params.key_spec != KeySpec::SymmetricDefault => {
                return Err(KmsError::InvalidKeySpec(format!(
                    "key material can only be imported for {}",
                    KeySpec::SymmetricDefault
                )));
            },
            _ => {},
        }
        if params.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(KmsError::Validation(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }

        let policy = match &params.policy {
            Some(document) => KeyPolicy::parse(document)?,
            None => KeyPolicy::default_for(&self.config.account_id, caller),
        };
        if !params.bypass_policy_lockout_safety_check
            && !policy.allows(caller, "kms:PutKeyPolicy")
        {
            return Err(KmsError::MalformedPolicy(format!(
                "policy would prevent {caller} from updating it"
            )));
        }

        let key_id = if params.multi_region {
            format!("mrk-{}", random::hex_encode(&random::generate_bytes(16)))
        } else {
            random::generate_id()
        };

        let mut materials = BTreeMap::new();
        let (state, current_material_version) = match params.origin {
            Origin::Internal => {
                if let Some(len) = params.key_spec.material_len() {
                    materials.insert(1, KeyMaterial::generate(len)?);
                    (KeyState::Enabled, 1)
                } else {
                    (KeyState::Enabled, 0)
                }
            },
            _ => (KeyState::PendingImport, 0),
        };

        let metadata = KeyMetadata {
            arn: self.config.key_arn(&key_id),
            key_id: key_id.clone(),
            account_id: self.config.account_id.clone(),
            owner: caller.clone(),
            description: params.description,
            state,
            usage: params.usage,
            key_spec: params.key_spec,
            origin: params.origin,
            creation_date: unix_now(),
            deletion_date: None,
            pending_deletion_window_days: None,
            valid_to: None,
            expiration_model: None,
            multi_region: params.multi_region,
            replica_regions: Vec::new(),
            current_material_version,
        };

        let bytes = self.encode(&metadata, &policy, &materials, None)?;
        self.backend
            .put_if_absent(&record_path(&key_id), &bytes)
            .await
            .map_err(|e| match e {
                StorageError::AlreadyExists(_) => {
                    KmsError::Storage(format!("key id collision: {key_id}"))
                },
                other => other.into(),
            })?;

        let entry = KeyEntry {
            metadata: metadata.clone(),
            policy,
            materials,
            fingerprint: None,
            deleted: false,
        };
        self.entries
            .write()
            .await
            .insert(key_id.clone(), Arc::new(RwLock::new(entry)));

        info!(
            key_id = %key_id,
            key_spec = %metadata.key_spec,
            usage = %metadata.usage,
            origin = %metadata.origin,
            owner = %caller,
            "key created"
        );
        Ok(metadata)
    }

    /// Metadata of a key, by id or ARN.
    pub async fn describe(&self, key_ref: &str) -> Result<KeyMetadata, KmsError> {
        let entry = self.entry(key_ref).await?;
        let entry = entry.read().await;
        entry.ensure_live()?;
        Ok(entry.metadata.clone())
    }

    /// Every live key, ordered by creation time then id.
    pub async fn list_keys(&self) -> Vec<KeyMetadata> {
        let snapshot: Vec<_> = self.entries.read().await.values().cloned().collect();

        let mut keys = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            let entry = entry.read().await;
            if entry.ensure_live().is_ok() {
                keys.push(entry.metadata.clone());
            }
        }
        keys.sort_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.key_id.cmp(&b.key_id))
        });
        keys
    }

    /// Fails with `Unauthorized` unless the key policy allows `action` for `caller`.
    ///
    /// Returns the resolved key id.
    pub async fn authorize_policy(
        &self,
        key_ref: &str,
        caller: &Principal,
        action: &str,
    ) -> Result<String, KmsError> {
        let entry = self.entry(key_ref).await?;
        let entry = entry.read().await;
        entry.ensure_live()?;

        if entry.policy.allows(caller, action) {
            Ok(entry.metadata.key_id.clone())
        } else {
            warn!(key_id = %entry.metadata.key_id, principal = %caller, action, "policy denied request");
            Err(KmsError::Unauthorized {
                principal: caller.to_string(),
                operation: action.to_string(),
                resource: entry.metadata.arn.clone(),
            })
        }
    }

    /// Applies a lifecycle transition.
    pub async fn set_state(
        &self,
        key_ref: &str,
        transition: KeyTransition,
    ) -> Result<KeyMetadata, KmsError> {
        let entry = self.entry(key_ref).await?;
        let mut entry = entry.write().await;
        entry.ensure_live()?;

        let current = entry.metadata.state;
        let key_id = entry.metadata.key_id.clone();
        let invalid = || KmsError::InvalidStateTransition {
            key_id: key_id.clone(),
            state: current,
            transition: transition.name().to_string(),
        };

        let mut next = entry.metadata.clone();
        match transition {
            KeyTransition::Enable => match current {
                KeyState::Enabled | KeyState::Disabled => next.state = KeyState::Enabled,
                _ => return Err(invalid()),
            },
            KeyTransition::Disable => match current {
                KeyState::Enabled | KeyState::Disabled => next.state = KeyState::Disabled,
                _ => return Err(invalid()),
            },
            KeyTransition::ScheduleDeletion { pending_window_days } => {
                let days = pending_window_days.unwrap_or(self.config.default_pending_window_days);
                if !(MIN_PENDING_WINDOW_DAYS..=MAX_PENDING_WINDOW_DAYS).contains(&days) {
                    return Err(KmsError::Validation(format!(
                        "pending window must be within {MIN_PENDING_WINDOW_DAYS}..={MAX_PENDING_WINDOW_DAYS} days, got {days}"
                    )));
                }
                if current.is_pending_deletion() {
                    return Err(invalid());
                }
                next.pending_deletion_window_days = Some(days);
                if next.replica_regions.is_empty() {
                    next.state = KeyState::PendingDeletion;
                    next.deletion_date = Some(unix_now() + u64::from(days) * SECONDS_PER_DAY);
                } else {
                    next.state = KeyState::PendingReplicaDeletion;
                    next.deletion_date = None;
                }
            },
            KeyTransition::CancelDeletion => {
                if !current.is_pending_deletion() {
                    return Err(invalid());
                }
                // an External key without material goes back to waiting for it
                next.state = if next.origin == Origin::External && !entry.has_material() {
                    KeyState::PendingImport
                } else {
                    KeyState::Disabled
                };
                next.deletion_date = None;
                next.pending_deletion_window_days = None;
            },
        }

        if next == entry.metadata {
            return Ok(next);
        }

        self.persist(&next, &entry.policy, &entry.materials, entry.fingerprint.as_deref())
            .await?;
        entry.metadata = next;

        match transition {
            KeyTransition::ScheduleDeletion { .. } => warn!(
                key_id = %entry.metadata.key_id,
                state = %entry.metadata.state,
                deletion_date = ?entry.metadata.deletion_date,
                "key deletion scheduled"
            ),
            _ => info!(
                key_id = %entry.metadata.key_id,
                from = %current,
                to = %entry.metadata.state,
                "key state changed"
            ),
        }
        Ok(entry.metadata.clone())
    }

    /// Imports symmetric material into an External key waiting for it.
    ///
    /// Re-importing after a deletion must supply the same material.
    pub async fn import_key_material(
        &self,
        key_ref: &str,
        material: &[u8],
        expiration_model: ExpirationModel,
        valid_to: Option<u64>,
    ) -> Result<KeyMetadata, KmsError> {
        let entry = self.entry(key_ref).await?;
        let mut entry = entry.write().await;
        entry.ensure_live()?;
        let key_id = entry.metadata.key_id.clone();

        if entry.metadata.origin != Origin::External {
            return Err(KmsError::UnsupportedOperationForKey {
                operation: "ImportKeyMaterial".into(),
                key_id,
            });
        }
        if entry.metadata.state != KeyState::PendingImport {
            return Err(KmsError::InvalidStateTransition {
                key_id,
                state: entry.metadata.state,
                transition: "import key material into".into(),
            });
        }
        if material.len() != IMPORTED_MATERIAL_LEN {
            return Err(KmsError::Validation(format!(
                "imported key material must be {IMPORTED_MATERIAL_LEN} bytes, got {}",
                material.len()
            )));
        }
        match (expiration_model, valid_to) {
            (ExpirationModel::KeyMaterialExpires, None) => {
                return Err(KmsError::Validation(
                    "valid_to is required when key material expires".into(),
                ));
            },
            (ExpirationModel::KeyMaterialExpires, Some(t)) if t <= unix_now() => {
                return Err(KmsError::Validation("valid_to must be in the future".into()));
            },
            (ExpirationModel::KeyMaterialDoesNotExpire, Some(_)) => {
                return Err(KmsError::Validation(
                    "valid_to is only allowed when key material expires".into(),
                ));
            },
            _ => {},
        }

        let fingerprint_key = self.fingerprint_key(&key_id)?;
        let fingerprint = match &entry.fingerprint {
            Some(expected) => {
                let tag = BASE64
                    .decode(expected)
                    .map_err(|e| KmsError::Storage(format!("corrupt fingerprint: {e}")))?;
                mac::verify(MacAlgorithm::HmacSha256, &fingerprint_key[..], material, &tag)
                    .map_err(|_| {
                        KmsError::Validation(
                            "key material does not match the material previously imported".into(),
                        )
                    })?;
                expected.clone()
            },
            None => BASE64.encode(mac::compute(
                MacAlgorithm::HmacSha256,
                &fingerprint_key[..],
                material,
            )?),
        };

        let mut materials = BTreeMap::new();
        materials.insert(1, KeyMaterial::from_bytes(material)?);

        let mut next = entry.metadata.clone();
        next.state = KeyState::Enabled;
        next.current_material_version = 1;
        next.expiration_model = Some(expiration_model);
        next.valid_to = valid_to;

        self.persist(&next, &entry.policy, &materials, Some(&fingerprint))
            .await?;
        entry.metadata = next;
        entry.materials = materials;
        entry.fingerprint = Some(fingerprint);

        info!(key_id = %key_id, expiration_model = %expiration_model, "key material imported");
        Ok(entry.metadata.clone())
    }

    /// Removes imported material; the key returns to PendingImport.
    pub async fn delete_imported_key_material(
        &self,
        key_ref: &str,
    ) -> Result<KeyMetadata, KmsError> {
        let entry = self.entry(key_ref).await?;
        let mut entry = entry.write().await;
        entry.ensure_live()?;

        if entry.metadata.origin != Origin::External {
            return Err(KmsError::UnsupportedOperationForKey {
                operation: "DeleteImportedKeyMaterial".into(),
                key_id: entry.metadata.key_id.clone(),
            });
        }

        let next = without_material(&entry.metadata);
        if next == entry.metadata && !entry.has_material() {
            return Ok(next);
        }

        self.persist(&next, &entry.policy, &BTreeMap::new(), entry.fingerprint.as_deref())
            .await?;
        entry.metadata = next;
        entry.materials.clear();

        warn!(key_id = %entry.metadata.key_id, "imported key material deleted");
        Ok(entry.metadata.clone())
    }

    /// Adds a new material version to an Internal symmetric key.
    ///
    /// New ciphertexts use the new version; older versions keep decrypting.
    pub async fn rotate_key(&self, key_ref: &str) -> Result<KeyMetadata, KmsError> {
        let entry = self.entry(key_ref).await?;
        let mut entry = entry.write().await;
        entry.ensure_live()?;
        let key_id = entry.metadata.key_id.clone();

        if entry.metadata.origin != Origin::Internal
            || entry.metadata.key_spec != KeySpec::SymmetricDefault
        {
            return Err(KmsError::UnsupportedOperationForKey {
                operation: "RotateKeyOnDemand".into(),
                key_id,
            });
        }
        if entry.metadata.state != KeyState::Enabled {
            return Err(KmsError::KeyUnavailable {
                key_id,
                state: entry.metadata.state,
            });
        }

        let version = entry.materials.keys().next_back().copied().unwrap_or(0) + 1;
        let mut materials = entry.materials.clone();
        materials.insert(version, KeyMaterial::generate(aead::KEY_SIZE)?);

        let mut next = entry.metadata.clone();
        next.current_material_version = version;

        self.persist(&next, &entry.policy, &materials, entry.fingerprint.as_deref())
            .await?;
        entry.metadata = next;
        entry.materials = materials;

        info!(key_id = %key_id, version, "key rotated");
        Ok(entry.metadata.clone())
    }

    /// Records a replica of a multi-region primary key in `region`.
    pub async fn replicate_key(
        &self,
        key_ref: &str,
        region: &str,
    ) -> Result<KeyMetadata, KmsError> {
        let entry = self.entry(key_ref).await?;
        let mut entry = entry.write().await;
        entry.ensure_live()?;
        let key_id = entry.metadata.key_id.clone();

        if !entry.metadata.multi_region {
            return Err(KmsError::UnsupportedOperationForKey {
                operation: "ReplicateKey".into(),
                key_id,
            });
        }
        if entry.metadata.state.is_pending_deletion() {
            return Err(KmsError::KeyUnavailable {
                key_id,
                state: entry.metadata.state,
            });
        }
        validate_region(region)?;
        if region == self.config.region {
            return Err(KmsError::Validation(format!(
                "replica region must differ from the primary region {region}"
            )));
        }
        if entry.metadata.replica_regions.iter().any(|r| r == region) {
            return Err(KmsError::Validation(format!(
                "key {key_id} is already replicated to {region}"
            )));
        }

        let mut next = entry.metadata.clone();
        next.replica_regions.push(region.to_string());
        next.replica_regions.sort();

        self.persist(&next, &entry.policy, &entry.materials, entry.fingerprint.as_deref())
            .await?;
        entry.metadata = next;

        info!(key_id = %key_id, region, "key replicated");
        Ok(entry.metadata.clone())
    }

    /// Removes the replica in `region`.
    ///
    /// Removing the last replica of a key in PendingReplicaDeletion starts its
    /// deletion waiting period.
    pub async fn delete_replica(
        &self,
        key_ref: &str,
        region: &str,
    ) -> Result<KeyMetadata, KmsError> {
        let entry = self.entry(key_ref).await?;
        let mut entry = entry.write().await;
        entry.ensure_live()?;
        let key_id = entry.metadata.key_id.clone();

        let mut next = entry.metadata.clone();
        let before = next.replica_regions.len();
        next.replica_regions.retain(|r| r != region);
        if next.replica_regions.len() == before {
            return Err(KmsError::Validation(format!(
                "key {key_id} has no replica in {region}"
            )));
        }

        if next.state == KeyState::PendingReplicaDeletion && next.replica_regions.is_empty() {
            let days = next
                .pending_deletion_window_days
                .unwrap_or(self.config.default_pending_window_days);
            next.state = KeyState::PendingDeletion;
            next.deletion_date = Some(unix_now() + u64::from(days) * SECONDS_PER_DAY);
        }

        self.persist(&next, &entry.policy, &entry.materials, entry.fingerprint.as_deref())
            .await?;
        entry.metadata = next;

        warn!(key_id = %key_id, region, state = %entry.metadata.state, "replica deleted");
        Ok(entry.metadata.clone())
    }

    /// Purges keys whose deletion date is at or before `now` and removes
    /// imported material whose `valid_to` has passed.
    pub async fn purge_expired(&self, now: u64) -> Result<PurgeReport, KmsError> {
        let snapshot: Vec<_> = self.entries.read().await.values().cloned().collect();
        let mut report = PurgeReport::default();

        for handle in snapshot {
            let mut entry = handle.write().await;
            if entry.deleted {
                continue;
            }
            let key_id = entry.metadata.key_id.clone();

            let due = entry.metadata.state == KeyState::PendingDeletion
                && entry.metadata.deletion_date.is_some_and(|d| d <= now);
            if due {
                self.backend.delete(&record_path(&key_id)).await?;
                entry.deleted = true;
                entry.materials.clear();
                entry.fingerprint = None;
                drop(entry);

                self.entries.write().await.remove(&key_id);
                warn!(key_id = %key_id, "key purged");
                report.deleted.push(key_id);
                continue;
            }

            let material_expired = entry.metadata.origin == Origin::External
                && entry.metadata.expiration_model == Some(ExpirationModel::KeyMaterialExpires)
                && entry.metadata.valid_to.is_some_and(|t| t <= now)
                && entry.has_material();
            if material_expired {
                let next = without_material(&entry.metadata);
                self.persist(&next, &entry.policy, &BTreeMap::new(), entry.fingerprint.as_deref())
                    .await?;
                entry.metadata = next;
                entry.materials.clear();

                warn!(key_id = %key_id, "imported key material expired");
                report.expired_material.push(key_id);
            }
        }

        Ok(report)
    }

    /// Shared handle on a key record, by id or ARN.
    pub(crate) async fn entry(&self, key_ref: &str) -> Result<Arc<RwLock<KeyEntry>>, KmsError> {
        let key_id = self.resolve_id(key_ref)?;
        debug!(key_id = %key_id, "key lookup");
        self.entries
            .read()
            .await
            .get(key_id)
            .cloned()
            .ok_or_else(|| KmsError::KeyNotFound(key_ref.to_string()))
    }

    fn resolve_id<'a>(&self, key_ref: &'a str) -> Result<&'a str, KmsError> {
        if key_ref.is_empty() {
            return Err(KmsError::Validation("key id is required".into()));
        }
        if key_ref.starts_with("arn:") {
            return key_ref
                .strip_prefix(&self.config.key_arn_prefix())
                .filter(|id| !id.is_empty())
                .ok_or_else(|| KmsError::KeyNotFound(key_ref.to_string()));
        }
        Ok(key_ref)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    async fn persist(
        &self,
        metadata: &KeyMetadata,
        policy: &KeyPolicy,
        materials: &BTreeMap<u32, KeyMaterial>,
        fingerprint: Option<&str>,
    ) -> Result<(), KmsError> {
        let bytes = self.encode(metadata, policy, materials, fingerprint)?;
        self.backend.put(&record_path(&metadata.key_id), &bytes).await?;
        debug!(key_id = %metadata.key_id, "key record written");
        Ok(())
    }

    fn encode(
        &self,
        metadata: &KeyMetadata,
        policy: &KeyPolicy,
        materials: &BTreeMap<u32, KeyMaterial>,
        fingerprint: Option<&str>,
    ) -> Result<Vec<u8>, KmsError> {
        let mut sealed = Vec::with_capacity(materials.len());
        for (version, material) in materials {
            let key = self.sealing_key(&metadata.key_id, *version)?;
            let aad = sealing_aad(&metadata.key_id, *version);
            let ciphertext = aead::seal(&key[..], material.as_bytes(), aad.as_bytes())?;
            sealed.push(SealedMaterial {
                version: *version,
                sealed: BASE64.encode(ciphertext),
            });
        }

        let stored = StoredKey {
            metadata: metadata.clone(),
            policy: policy.clone(),
            materials: sealed,
            fingerprint: fingerprint.map(str::to_string),
        };
        serde_json::to_vec(&stored).map_err(|e| KmsError::Storage(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<KeyEntry, KmsError> {
        let stored: StoredKey =
            serde_json::from_slice(bytes).map_err(|e| KmsError::Storage(e.to_string()))?;
        let key_id = &stored.metadata.key_id;

        let mut materials = BTreeMap::new();
        for sealed in &stored.materials {
            let ciphertext = BASE64
                .decode(&sealed.sealed)
                .map_err(|e| KmsError::Storage(format!("corrupt material for {key_id}: {e}")))?;
            let key = self.sealing_key(key_id, sealed.version)?;
            let aad = sealing_aad(key_id, sealed.version);
            let plaintext = aead::open(&key[..], &ciphertext, aad.as_bytes())?;
            materials.insert(sealed.version, KeyMaterial::from_bytes(&plaintext)?);
        }

        Ok(KeyEntry {
            metadata: stored.metadata,
            policy: stored.policy,
            materials,
            fingerprint: stored.fingerprint,
            deleted: false,
        })
    }

    fn sealing_key(
        &self,
        key_id: &str,
        version: u32,
    ) -> Result<zeroize::Zeroizing<[u8; aead::KEY_SIZE]>, KmsError> {
        Ok(kdf::derive_subkey(
            self.root_key.as_bytes(),
            &format!("coffer-kms-v1:{key_id}:{version}"),
        )?)
    }

    fn fingerprint_key(
        &self,
        key_id: &str,
    ) -> Result<zeroize::Zeroizing<[u8; aead::KEY_SIZE]>, KmsError> {
        Ok(kdf::derive_subkey(
            self.root_key.as_bytes(),
            &format!("coffer-kms-v1:import-fingerprint:{key_id}"),
        )?)
    }
}

fn record_path(key_id: &str) -> String {
    format!("{KEY_PREFIX}{key_id}")
}

fn sealing_aad(key_id: &str, version: u32) -> String {
    format!("coffer-key-material:{key_id}:{version}")
}

/// Metadata of an External key once its material is gone.
fn without_material(metadata: &KeyMetadata) -> KeyMetadata {
    let mut next = metadata.clone();
    if matches!(next.state, KeyState::Enabled | KeyState::Disabled) {
        next.state = KeyState::PendingImport;
    }
    next.current_material_version = 0;
    next.valid_to = None;
    next.expiration_model = None;
    next
}

fn validate_region(region: &str) -> Result<(), KmsError> {
    let valid = !region.is_empty()
        && region.len() <= 32
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(KmsError::Validation(format!("invalid region: {region:?}")))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use coffer_storage::MemoryBackend;
    use tempfile::TempDir;

    fn alice() -> Principal {
        Principal::new("arn:coffer:iam::000000000000:user/alice")
    }

    async fn store_on(backend: Arc<dyn StorageBackend>, root: Arc<RootKey>) -> KeyStore {
        KeyStore::open(backend, root, KmsConfig::default()).await.unwrap()
    }

    async fn memory_store() -> KeyStore {
        store_on(Arc::new(MemoryBackend::new()), Arc::new(RootKey::generate())).await
    }

    fn external() -> CreateKeyParams {
        CreateKeyParams {
            origin: Origin::External,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_valid_pairs() {
        let store = memory_store().await;

        for spec in KeySpec::ALL {
            for usage in spec.valid_usages() {
                let created = store
                    .create(
                        &alice(),
                        CreateKeyParams {
                            usage: *usage,
                            key_spec: *spec,
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();

                let described = store.describe(&created.key_id).await.unwrap();
                assert_eq!(described.key_spec, *spec);
                assert_eq!(described.usage, *usage);
                assert_eq!(described.state, KeyState::Enabled);
            }
        }
    }

    #[tokio::test]
    async fn test_create_rejects_usage_mismatch() {
        let store = memory_store().await;

        let result = store
            .create(
                &alice(),
                CreateKeyParams {
                    usage: KeyUsage::GenerateVerifyMac,
                    key_spec: KeySpec::SymmetricDefault,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(KmsError::InvalidKeySpec(_))));

        let result = store
            .create(
                &alice(),
                CreateKeyParams {
                    usage: KeyUsage::KeyAgreement,
                    key_spec: KeySpec::Rsa2048,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(KmsError::InvalidKeySpec(_))));
    }

    #[tokio::test]
    async fn test_create_origins() {
        let store = memory_store().await;

        let key = store.create(&alice(), external()).await.unwrap();
        assert_eq!(key.state, KeyState::PendingImport);
        assert_eq!(key.current_material_version, 0);

        let result = store
            .create(
                &alice(),
                CreateKeyParams {
                    origin: Origin::ExternalStore,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(KmsError::Validation(_))));

        let result = store
            .create(
                &alice(),
                CreateKeyParams {
                    origin: Origin::External,
                    usage: KeyUsage::GenerateVerifyMac,
                    key_spec: KeySpec::Hmac256,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(KmsError::InvalidKeySpec(_))));
    }

    #[tokio::test]
    async fn test_policy_lockout_check() {
        let store = memory_store().await;
        let doc = r#"{
            "Version": "2012-10-17",
            "Statement": [{"Effect": "Allow", "Principal": "*", "Action": "kms:Encrypt"}]
        }"#;

        let result = store
            .create(
                &alice(),
                CreateKeyParams {
                    policy: Some(doc.to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(KmsError::MalformedPolicy(_))));

        let created = store
            .create(
                &alice(),
                CreateKeyParams {
                    policy: Some(doc.to_string()),
                    bypass_policy_lockout_safety_check: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(created.is_ok());

        let result = store
            .create(
                &alice(),
                CreateKeyParams {
                    policy: Some("{".to_string()),
                    bypass_policy_lockout_safety_check: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(KmsError::MalformedPolicy(_))));
    }

    #[tokio::test]
    async fn test_describe_by_arn() {
        let store = memory_store().await;
        let key = store.create(&alice(), CreateKeyParams::default()).await.unwrap();

        assert_eq!(store.describe(&key.arn).await.unwrap().key_id, key.key_id);
        assert!(matches!(
            store.describe("missing").await,
            Err(KmsError::KeyNotFound(_))
        ));
        assert!(matches!(
            store
                .describe(&format!("arn:coffer:kms:other-1:000000000000:key/{}", key.key_id))
                .await,
            Err(KmsError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_multi_region_ids() {
        let store = memory_store().await;
        let key = store
            .create(
                &alice(),
                CreateKeyParams {
                    multi_region: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(key.key_id.starts_with("mrk-"));
        assert!(key.multi_region);
    }

    #[tokio::test]
    async fn test_state_machine() {
        let store = memory_store().await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;

        let key = store.set_state(&id, KeyTransition::Disable).await.unwrap();
        assert_eq!(key.state, KeyState::Disabled);

        let key = store.set_state(&id, KeyTransition::Enable).await.unwrap();
        assert_eq!(key.state, KeyState::Enabled);

        let key = store
            .set_state(&id, KeyTransition::ScheduleDeletion { pending_window_days: Some(7) })
            .await
            .unwrap();
        assert_eq!(key.state, KeyState::PendingDeletion);
        assert_eq!(key.pending_deletion_window_days, Some(7));
        assert!(key.deletion_date.is_some());

        let result = store.set_state(&id, KeyTransition::Enable).await;
        assert!(matches!(
            result,
            Err(KmsError::InvalidStateTransition { state: KeyState::PendingDeletion, .. })
        ));
        let result = store
            .set_state(&id, KeyTransition::ScheduleDeletion { pending_window_days: None })
            .await;
        assert!(matches!(result, Err(KmsError::InvalidStateTransition { .. })));

        let key = store.set_state(&id, KeyTransition::CancelDeletion).await.unwrap();
        assert_eq!(key.state, KeyState::Disabled);
        assert!(key.deletion_date.is_none());

        let result = store.set_state(&id, KeyTransition::CancelDeletion).await;
        assert!(matches!(result, Err(KmsError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_pending_window_bounds() {
        let store = memory_store().await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;

        for days in [0, 6, 31] {
            let result = store
                .set_state(&id, KeyTransition::ScheduleDeletion { pending_window_days: Some(days) })
                .await;
            assert!(matches!(result, Err(KmsError::Validation(_))), "accepted {days}");
        }

        let key = store
            .set_state(&id, KeyTransition::ScheduleDeletion { pending_window_days: None })
            .await
            .unwrap();
        assert_eq!(key.pending_deletion_window_days, Some(30));
    }

    #[tokio::test]
    async fn test_purge_after_window() {
        let store = memory_store().await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;
        let key = store
            .set_state(&id, KeyTransition::ScheduleDeletion { pending_window_days: Some(7) })
            .await
            .unwrap();
        let deletion_date = key.deletion_date.unwrap();

        let report = store.purge_expired(deletion_date - 1).await.unwrap();
        assert!(report.deleted.is_empty());

        let report = store.purge_expired(deletion_date).await.unwrap();
        assert_eq!(report.deleted, vec![id.clone()]);
        assert!(matches!(store.describe(&id).await, Err(KmsError::KeyNotFound(_))));
        assert!(store.list_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_import_material() {
        let store = memory_store().await;
        let id = store.create(&alice(), external()).await.unwrap().key_id;
        let material = [7u8; 32];

        let result = store
            .import_key_material(&id, &[1u8; 16], ExpirationModel::KeyMaterialDoesNotExpire, None)
            .await;
        assert!(matches!(result, Err(KmsError::Validation(_))));

        let result = store
            .import_key_material(&id, &material, ExpirationModel::KeyMaterialExpires, None)
            .await;
        assert!(matches!(result, Err(KmsError::Validation(_))));

        let key = store
            .import_key_material(&id, &material, ExpirationModel::KeyMaterialDoesNotExpire, None)
            .await
            .unwrap();
        assert_eq!(key.state, KeyState::Enabled);
        assert_eq!(key.current_material_version, 1);

        let result = store
            .import_key_material(&id, &material, ExpirationModel::KeyMaterialDoesNotExpire, None)
            .await;
        assert!(matches!(result, Err(KmsError::InvalidStateTransition { .. })));

        let key = store.delete_imported_key_material(&id).await.unwrap();
        assert_eq!(key.state, KeyState::PendingImport);

        let result = store
            .import_key_material(&id, &[8u8; 32], ExpirationModel::KeyMaterialDoesNotExpire, None)
            .await;
        assert!(matches!(result, Err(KmsError::Validation(_))));

        store
            .import_key_material(&id, &material, ExpirationModel::KeyMaterialDoesNotExpire, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_import_requires_external_origin() {
        let store = memory_store().await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;

        let result = store
            .import_key_material(&id, &[0u8; 32], ExpirationModel::KeyMaterialDoesNotExpire, None)
            .await;
        assert!(matches!(result, Err(KmsError::UnsupportedOperationForKey { .. })));
        assert!(matches!(
            store.delete_imported_key_material(&id).await,
            Err(KmsError::UnsupportedOperationForKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_imported_material_expires() {
        let store = memory_store().await;
        let id = store.create(&alice(), external()).await.unwrap().key_id;
        let valid_to = unix_now() + 3600;

        store
            .import_key_material(&id, &[3u8; 32], ExpirationModel::KeyMaterialExpires, Some(valid_to))
            .await
            .unwrap();

        let report = store.purge_expired(valid_to - 1).await.unwrap();
        assert!(report.expired_material.is_empty());

        let report = store.purge_expired(valid_to).await.unwrap();
        assert_eq!(report.expired_material, vec![id.clone()]);
        assert_eq!(store.describe(&id).await.unwrap().state, KeyState::PendingImport);
    }

    #[tokio::test]
    async fn test_cancel_deletion_without_material() {
        let store = memory_store().await;
        let id = store.create(&alice(), external()).await.unwrap().key_id;

        store
            .set_state(&id, KeyTransition::ScheduleDeletion { pending_window_days: Some(7) })
            .await
            .unwrap();
        let key = store.set_state(&id, KeyTransition::CancelDeletion).await.unwrap();

        assert_eq!(key.state, KeyState::PendingImport);
    }

    #[tokio::test]
    async fn test_rotate() {
        let store = memory_store().await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;

        let key = store.rotate_key(&id).await.unwrap();
        assert_eq!(key.current_material_version, 2);

        {
            let entry = store.entry(&id).await.unwrap();
            let entry = entry.read().await;
            assert!(entry.material(1).is_some());
            assert_eq!(entry.current_material().unwrap().0, 2);
        }

        store.set_state(&id, KeyTransition::Disable).await.unwrap();
        assert!(matches!(
            store.rotate_key(&id).await,
            Err(KmsError::KeyUnavailable { .. })
        ));

        let hmac = store
            .create(
                &alice(),
                CreateKeyParams {
                    usage: KeyUsage::GenerateVerifyMac,
                    key_spec: KeySpec::Hmac256,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            store.rotate_key(&hmac.key_id).await,
            Err(KmsError::UnsupportedOperationForKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_replica_deletion_flow() {
        let store = memory_store().await;
        let id = store
            .create(
                &alice(),
                CreateKeyParams {
                    multi_region: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .key_id;

        store.replicate_key(&id, "eu-west-3").await.unwrap();
        let key = store.replicate_key(&id, "us-east-2").await.unwrap();
        assert_eq!(key.replica_regions, vec!["eu-west-3", "us-east-2"]);

        assert!(matches!(
            store.replicate_key(&id, "eu-west-3").await,
            Err(KmsError::Validation(_))
        ));
        assert!(matches!(
            store.replicate_key(&id, "local-1").await,
            Err(KmsError::Validation(_))
        ));

        let key = store
            .set_state(&id, KeyTransition::ScheduleDeletion { pending_window_days: Some(10) })
            .await
            .unwrap();
        assert_eq!(key.state, KeyState::PendingReplicaDeletion);
        assert!(key.deletion_date.is_none());

        let key = store.delete_replica(&id, "eu-west-3").await.unwrap();
        assert_eq!(key.state, KeyState::PendingReplicaDeletion);

        let key = store.delete_replica(&id, "us-east-2").await.unwrap();
        assert_eq!(key.state, KeyState::PendingDeletion);
        assert!(key.deletion_date.is_some());
    }

    #[tokio::test]
    async fn test_replicate_requires_multi_region() {
        let store = memory_store().await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;

        assert!(matches!(
            store.replicate_key(&id, "eu-west-3").await,
            Err(KmsError::UnsupportedOperationForKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_authorize_policy() {
        let store = memory_store().await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;

        assert_eq!(
            store.authorize_policy(&id, &alice(), "kms:DisableKey").await.unwrap(),
            id
        );
        let mallory = Principal::new("arn:coffer:iam::999999999999:user/mallory");
        assert!(matches!(
            store.authorize_policy(&id, &mallory, "kms:DisableKey").await,
            Err(KmsError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_reopen_restores_records_and_material() {
        let temp_dir = TempDir::new().unwrap();
        let root = Arc::new(RootKey::generate());

        let (id, material) = {
            let backend = Arc::new(
                coffer_storage_sqlite::SqliteBackend::open(temp_dir.path(), "test")
                    .await
                    .unwrap(),
            );
            let store = store_on(backend, root.clone()).await;
            let id = store
                .create(&alice(), CreateKeyParams::default())
                .await
                .unwrap()
                .key_id;
            store.rotate_key(&id).await.unwrap();
            store.set_state(&id, KeyTransition::Disable).await.unwrap();

            let entry = store.entry(&id).await.unwrap();
            let material = entry.read().await.material(1).unwrap().clone();
            (id, material)
        };

        let backend = Arc::new(
            coffer_storage_sqlite::SqliteBackend::open(temp_dir.path(), "test")
                .await
                .unwrap(),
        );
        let store = store_on(backend, root).await;

        let key = store.describe(&id).await.unwrap();
        assert_eq!(key.state, KeyState::Disabled);
        assert_eq!(key.current_material_version, 2);

        let entry = store.entry(&id).await.unwrap();
        assert_eq!(entry.read().await.material(1).unwrap(), &material);
    }

    #[tokio::test]
    async fn test_reopen_with_other_root_key_fails() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let store = store_on(backend.clone(), Arc::new(RootKey::generate())).await;
        store.create(&alice(), CreateKeyParams::default()).await.unwrap();

        let result = KeyStore::open(backend, Arc::new(RootKey::generate()), KmsConfig::default()).await;
        assert!(matches!(result, Err(KmsError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_material_never_stored_in_plaintext() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_on(backend.clone(), Arc::new(RootKey::generate())).await;
        let id = store
            .create(&alice(), CreateKeyParams::default())
            .await
            .unwrap()
            .key_id;

        let stored = backend.get(&record_path(&id)).await.unwrap().unwrap();
        let entry = store.entry(&id).await.unwrap();
        let entry = entry.read().await;
        let material = entry.material(1).unwrap().as_bytes();

        assert!(!stored.windows(material.len()).any(|w| w == material));
        let encoded = BASE64.encode(material);
        assert!(!String::from_utf8_lossy(&stored).contains(&encoded));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates() {
        let store = Arc::new(memory_store().await);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create(&alice(), CreateKeyParams::default()).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list_keys().await.len(), 16);
    }
}
