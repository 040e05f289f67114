//! Grants: scoped, revocable delegations of operations on one key.
//!
//! Grants are sharded per key. Each shard sits behind its own lock, so
//! creating a named grant checks for an existing one and inserts under a single
//! write lock. When both are needed, the key record lock is always taken
//! before the shard lock.
//!
//! A caller authorized for `CreateGrant` only through a grant or grant token
//! can delegate no more than that grant holds: the new grant's operations must
//! be a subset of the parent's, and its constraint at least as strict.
//!
//! Storage layout:
//! - `grants/{key_id}/{grant_id}`: active grant (JSON)
//! - `grant-tombstones/{key_id}/{grant_id}`: retired or revoked grant

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use coffer_crypto::{random, RootKey};
use coffer_storage::{StorageBackend, StorageError};

use crate::context::{EncryptionContext, GrantConstraints};
use crate::error::KmsError;
use crate::keystore::{KeyEntry, KeyStore};
use crate::token::{GrantClaims, TokenSigner};
use crate::types::{unix_now, wire_enum, KeySpec, KeyUsage, Outcome, Principal};

const GRANT_PREFIX: &str = "grants/";
const TOMBSTONE_PREFIX: &str = "grant-tombstones/";

/// Longest grant name, in characters.
pub const MAX_GRANT_NAME_LEN: usize = 256;

/// Largest number of grant tokens a request may carry.
pub const MAX_GRANT_TOKENS: usize = 10;

wire_enum! {
    /// Operation a grant can delegate.
    GrantOperation {
        /// Decrypt.
        Decrypt => "Decrypt",
        /// Encrypt.
        Encrypt => "Encrypt",
        /// GenerateDataKey.
        GenerateDataKey => "GenerateDataKey",
        /// GenerateDataKeyWithoutPlaintext.
        GenerateDataKeyWithoutPlaintext => "GenerateDataKeyWithoutPlaintext",
        /// ReEncrypt with the key as source.
        ReEncryptFrom => "ReEncryptFrom",
        /// ReEncrypt with the key as destination.
        ReEncryptTo => "ReEncryptTo",
        /// Sign.
        Sign => "Sign",
        /// Verify.
        Verify => "Verify",
        /// GetPublicKey.
        GetPublicKey => "GetPublicKey",
        /// CreateGrant.
        CreateGrant => "CreateGrant",
        /// RetireGrant.
        RetireGrant => "RetireGrant",
        /// DescribeKey.
        DescribeKey => "DescribeKey",
        /// GenerateDataKeyPair.
        GenerateDataKeyPair => "GenerateDataKeyPair",
        /// GenerateDataKeyPairWithoutPlaintext.
        GenerateDataKeyPairWithoutPlaintext => "GenerateDataKeyPairWithoutPlaintext",
        /// GenerateMac.
        GenerateMac => "GenerateMac",
        /// VerifyMac.
        VerifyMac => "VerifyMac",
        /// DeriveSharedSecret.
        DeriveSharedSecret => "DeriveSharedSecret",
    }
}

impl GrantOperation {
    /// Whether this operation can be granted on a key of `spec` and `usage`.
    pub fn valid_for(self, spec: KeySpec, usage: KeyUsage) -> bool {
        use GrantOperation::*;

        if matches!(self, CreateGrant | RetireGrant | DescribeKey) {
            return true;
        }
        match usage {
            KeyUsage::EncryptDecrypt if spec == KeySpec::SymmetricDefault => matches!(
                self,
                Decrypt
                    | Encrypt
                    | GenerateDataKey
                    | GenerateDataKeyWithoutPlaintext
                    | ReEncryptFrom
                    | ReEncryptTo
                    | GenerateDataKeyPair
                    | GenerateDataKeyPairWithoutPlaintext
            ),
            KeyUsage::EncryptDecrypt => matches!(
                self,
                Decrypt | Encrypt | ReEncryptFrom | ReEncryptTo | GetPublicKey
            ),
            KeyUsage::SignVerify => matches!(self, Sign | Verify | GetPublicKey),
            KeyUsage::GenerateVerifyMac => matches!(self, GenerateMac | VerifyMac),
            KeyUsage::KeyAgreement => matches!(self, DeriveSharedSecret | GetPublicKey),
        }
    }

    /// Policy action naming this operation, e.g. `kms:Decrypt`.
    pub fn policy_action(self) -> String {
        format!("kms:{}", self.as_str())
    }
}

/// An active grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Grant id (64 hex characters).
    pub grant_id: String,
    /// Key the grant applies to.
    pub key_id: String,
    /// Principal receiving the permissions.
    pub grantee: Principal,
    /// Principal allowed to retire the grant besides the grantee.
    pub retiring_principal: Option<Principal>,
    /// Delegated operations.
    pub operations: BTreeSet<GrantOperation>,
    /// Encryption context constraint.
    pub constraints: Option<GrantConstraints>,
    /// Creation time (Unix seconds).
    pub creation_date: u64,
    /// Name used for idempotent creation.
    pub name: Option<String>,
    /// Principal that created the grant.
    pub issuing_principal: Principal,
}

impl Grant {
    fn permits(
        &self,
        principal: &Principal,
        operation: GrantOperation,
        context: &EncryptionContext,
    ) -> bool {
        &self.grantee == principal
            && self.operations.contains(&operation)
            && self.constraints.as_ref().map_or(true, |c| c.permits(context))
    }

    fn same_parameters(&self, other: &Grant) -> bool {
        self.grantee == other.grantee
            && self.retiring_principal == other.retiring_principal
            && self.operations == other.operations
            && self.constraints == other.constraints
    }
}

/// Parameters of [`GrantTable::create_grant`].
#[derive(Debug, Clone, Default)]
pub struct CreateGrantParams {
    /// Key id or ARN.
    pub key_id: String,
    /// Principal receiving the permissions.
    pub grantee: Option<Principal>,
    /// Principal allowed to retire the grant.
    pub retiring_principal: Option<Principal>,
    /// Delegated operations.
    pub operations: Vec<GrantOperation>,
    /// Encryption context constraint.
    pub constraints: Option<GrantConstraints>,
    /// Name for idempotent creation.
    pub name: Option<String>,
    /// Tokens proving the caller's own entitlement.
    pub grant_tokens: Vec<String>,
    /// Check only; create nothing.
    pub dry_run: bool,
}

/// A grant id with a freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedGrant {
    /// Grant id.
    pub grant_id: String,
    /// Token usable right away.
    pub grant_token: String,
}

/// Identifies the grant to retire.
#[derive(Debug, Clone, Default)]
pub struct RetireGrantParams {
    /// Token of the grant.
    pub grant_token: Option<String>,
    /// Key id or ARN, with `grant_id`.
    pub key_id: Option<String>,
    /// Grant id.
    pub grant_id: Option<String>,
    /// Check only; retire nothing.
    pub dry_run: bool,
}

#[derive(Debug, Default)]
struct GrantShard {
    grants: HashMap<String, Grant>,
    retired: HashSet<String>,
}

impl GrantShard {
    /// Active grant sharing `candidate`'s name, if its parameters match.
    fn find_named(&self, candidate: &Grant) -> Result<Option<Grant>, KmsError> {
        let Some(name) = &candidate.name else {
            return Ok(None);
        };
        match self.grants.values().find(|g| g.name.as_ref() == Some(name)) {
            Some(existing) if existing.same_parameters(candidate) => Ok(Some(existing.clone())),
            Some(_) => Err(KmsError::DuplicateGrantNameConflict {
                key_id: candidate.key_id.clone(),
                name: name.clone(),
            }),
            None => Ok(None),
        }
    }
}

/// How a caller is entitled to `CreateGrant`.
enum GrantAuthority {
    Policy,
    Delegated(Vec<Delegation>),
}

/// Rights of a grant or token that carries `CreateGrant`.
struct Delegation {
    operations: BTreeSet<GrantOperation>,
    constraints: Option<GrantConstraints>,
}

impl Delegation {
    fn covers(
        &self,
        operations: &BTreeSet<GrantOperation>,
        constraints: Option<&GrantConstraints>,
    ) -> bool {
        let constraint_ok = match (constraints, &self.constraints) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(child), Some(parent)) => child.is_within(parent),
        };
        constraint_ok && operations.is_subset(&self.operations)
    }
}

#[derive(Serialize, Deserialize)]
struct Tombstone {
    retired_at: u64,
    by: Principal,
}

/// Owner of every grant.
pub struct GrantTable {
    backend: Arc<dyn StorageBackend>,
    keys: Arc<KeyStore>,
    signer: TokenSigner,
    shards: RwLock<HashMap<String, Arc<RwLock<GrantShard>>>>,
    index: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for GrantTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantTable").finish_non_exhaustive()
    }
}

impl GrantTable {
    /// Opens the table and loads persisted grants and tombstones.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        keys: Arc<KeyStore>,
        root_key: &RootKey,
    ) -> Result<Self, KmsError> {
        let mut shards: HashMap<String, GrantShard> = HashMap::new();
        let mut index = HashMap::new();

        for path in backend.list(GRANT_PREFIX).await? {
            let Some(bytes) = backend.get(&path).await? else {
                continue;
            };
            let grant: Grant = serde_json::from_slice(&bytes)
                .map_err(|e| KmsError::Storage(format!("corrupt grant {path}: {e}")))?;
            index.insert(grant.grant_id.clone(), grant.key_id.clone());
            shards
                .entry(grant.key_id.clone())
                .or_default()
                .grants
                .insert(grant.grant_id.clone(), grant);
        }

        let mut tombstones = 0usize;
        for path in backend.list(TOMBSTONE_PREFIX).await? {
            let Some((key_id, grant_id)) = path
                .strip_prefix(TOMBSTONE_PREFIX)
                .and_then(|rest| rest.split_once('/'))
            else {
                continue;
            };
            shards
                .entry(key_id.to_string())
                .or_default()
                .retired
                .insert(grant_id.to_string());
            tombstones += 1;
        }

        info!(grants = index.len(), tombstones, "grant table opened");
        Ok(Self {
            backend,
            keys,
            signer: TokenSigner::new(root_key)?,
            shards: RwLock::new(
                shards
                    .into_iter()
                    .map(|(k, s)| (k, Arc::new(RwLock::new(s))))
                    .collect(),
            ),
            index: RwLock::new(index),
        })
    }

    /// Creates a grant, or returns the existing one when `name` matches an
    /// identical active grant. A new token is issued either way.
    pub async fn create_grant(
        &self,
        caller: &Principal,
        params: CreateGrantParams,
    ) -> Result<Outcome<CreatedGrant>, KmsError> {
        let entry = self.keys.entry(&params.key_id).await?;
        let entry = entry.read().await;
        entry.ensure_live()?;
        let key_id = entry.metadata.key_id.clone();

        validate_tokens(&params.grant_tokens)?;
        let authority = self
            .create_grant_authority(&entry, caller, &params.grant_tokens)
            .await?;

        if entry.metadata.state.is_pending_deletion() {
            return Err(KmsError::KeyUnavailable {
                key_id,
                state: entry.metadata.state,
            });
        }

        let grantee = params
            .grantee
            .filter(|g| !g.as_str().is_empty())
            .ok_or_else(|| KmsError::Validation("grantee principal is required".into()))?;
        if params.operations.is_empty() {
            return Err(KmsError::Validation("at least one operation is required".into()));
        }
        for op in &params.operations {
            if !op.valid_for(entry.metadata.key_spec, entry.metadata.usage) {
                return Err(KmsError::UnsupportedOperationForKey {
                    operation: op.to_string(),
                    key_id,
                });
            }
        }
        if let Some(name) = &params.name {
            validate_grant_name(name)?;
        }

        let operations: BTreeSet<GrantOperation> = params.operations.into_iter().collect();
        if let GrantAuthority::Delegated(parents) = &authority {
            if !parents
                .iter()
                .any(|p| p.covers(&operations, params.constraints.as_ref()))
            {
                return Err(denied(&entry, caller, "CreateGrant"));
            }
        }

        let candidate = Grant {
            grant_id: random::hex_encode(&random::generate_bytes(32)),
            key_id: key_id.clone(),
            grantee,
            retiring_principal: params.retiring_principal,
            operations,
            constraints: params.constraints,
            creation_date: unix_now(),
            name: params.name,
            issuing_principal: caller.clone(),
        };

        if params.dry_run {
            let shard = self.shards.read().await.get(&key_id).cloned();
            if let Some(shard) = shard {
                shard.read().await.find_named(&candidate)?;
            }
            return Ok(Outcome::DryRun);
        }

        let shard = self.shard(&key_id).await;
        let mut shard = shard.write().await;

        let (grant, fresh) = match shard.find_named(&candidate)? {
            Some(existing) => (existing, false),
            None => (candidate, true),
        };

        let token = self.signer.issue(&GrantClaims {
            gid: grant.grant_id.clone(),
            kid: key_id.clone(),
            grantee: grant.grantee.clone(),
            ops: grant.operations.iter().copied().collect(),
            constraints: grant.constraints.clone(),
            iat: unix_now(),
            nonce: TokenSigner::new_nonce(),
        })?;
        let grant_id = grant.grant_id.clone();

        if fresh {
            let bytes =
                serde_json::to_vec(&grant).map_err(|e| KmsError::Storage(e.to_string()))?;
            let path = grant_path(&key_id, &grant_id);
            self.backend.put_if_absent(&path, &bytes).await.map_err(|e| match e {
                StorageError::AlreadyExists(_) => {
                    KmsError::Storage(format!("grant id collision: {grant_id}"))
                },
                other => other.into(),
            })?;
            self.index
                .write()
                .await
                .insert(grant_id.clone(), key_id.clone());
            info!(
                key_id = %key_id,
                grant_id = %grant_id,
                grantee = %grant.grantee,
                "grant created"
            );
            shard.grants.insert(grant_id.clone(), grant);
        } else {
            debug!(key_id = %key_id, grant_id = %grant_id, "grant token reissued");
        }

        Ok(Outcome::Completed(CreatedGrant {
            grant_id,
            grant_token: token,
        }))
    }

    /// Whether `principal` may perform `operation` on the key.
    pub async fn authorize(
        &self,
        key_ref: &str,
        principal: &Principal,
        operation: GrantOperation,
        context: &EncryptionContext,
        tokens: &[String],
    ) -> Result<bool, KmsError> {
        let entry = self.keys.entry(key_ref).await?;
        let entry = entry.read().await;
        entry.ensure_live()?;
        Ok(self
            .is_authorized(&entry, principal, &[operation], context, tokens)
            .await)
    }

    /// Active grants on a key, oldest first.
    pub async fn list_grants(&self, key_ref: &str) -> Result<Vec<Grant>, KmsError> {
        let key_id = self.keys.describe(key_ref).await?.key_id;
        let shard = self.shards.read().await.get(&key_id).cloned();

        let mut grants: Vec<Grant> = match shard {
            Some(shard) => shard.read().await.grants.values().cloned().collect(),
            None => Vec::new(),
        };
        grants.sort_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.grant_id.cmp(&b.grant_id))
        });
        Ok(grants)
    }

    /// Retires a grant. Allowed for its grantee and its retiring principal.
    pub async fn retire_grant(
        &self,
        caller: &Principal,
        params: RetireGrantParams,
    ) -> Result<Outcome<()>, KmsError> {
        let (key_id, grant_id) = match (&params.grant_token, &params.grant_id) {
            (Some(token), _) => {
                let claims = self.signer.verify(token).ok_or_else(|| {
                    KmsError::Validation("grant token is invalid".into())
                })?;
                (claims.kid, claims.gid)
            },
            (None, Some(grant_id)) => {
                let key_id = match &params.key_id {
                    Some(key_ref) => self.keys.describe(key_ref).await?.key_id,
                    None => self
                        .index
                        .read()
                        .await
                        .get(grant_id)
                        .cloned()
                        .ok_or_else(|| KmsError::GrantNotFound(grant_id.clone()))?,
                };
                (key_id, grant_id.clone())
            },
            (None, None) => {
                return Err(KmsError::Validation(
                    "either a grant token or a grant id is required".into(),
                ));
            },
        };

        self.remove_grant(caller, &key_id, &grant_id, params.dry_run, |grant, _| {
            &grant.grantee == caller || grant.retiring_principal.as_ref() == Some(caller)
        })
        .await
    }

    /// Revokes a grant. Allowed for the key owner: its creator, the owning
    /// account root, or a principal the key policy allows `kms:RevokeGrant`.
    pub async fn revoke_grant(
        &self,
        caller: &Principal,
        key_ref: &str,
        grant_id: &str,
        dry_run: bool,
    ) -> Result<Outcome<()>, KmsError> {
        let key_id = self.keys.describe(key_ref).await?.key_id;

        self.remove_grant(caller, &key_id, grant_id, dry_run, |_, entry| {
            &entry.metadata.owner == caller
                || &Principal::account_root(&entry.metadata.account_id) == caller
                || entry.policy.allows(caller, "kms:RevokeGrant")
        })
        .await
    }

    /// Drops every grant and tombstone of a purged key.
    pub async fn purge_key(&self, key_id: &str) -> Result<usize, KmsError> {
        let shard = self.shards.write().await.remove(key_id);

        for path in self.backend.list(&format!("{GRANT_PREFIX}{key_id}/")).await? {
            self.backend.delete(&path).await?;
        }
        for path in self
            .backend
            .list(&format!("{TOMBSTONE_PREFIX}{key_id}/"))
            .await?
        {
            self.backend.delete(&path).await?;
        }

        let Some(shard) = shard else {
            return Ok(0);
        };
        let shard = shard.read().await;
        let mut index = self.index.write().await;
        for grant_id in shard.grants.keys() {
            index.remove(grant_id);
        }

        if !shard.grants.is_empty() {
            warn!(key_id = %key_id, grants = shard.grants.len(), "grants of purged key dropped");
        }
        Ok(shard.grants.len())
    }

    /// Fails with `Unauthorized` unless `principal` holds one of `operations`.
    pub(crate) async fn require(
        &self,
        entry: &KeyEntry,
        principal: &Principal,
        operations: &[GrantOperation],
        context: &EncryptionContext,
        tokens: &[String],
    ) -> Result<(), KmsError> {
        if self
            .is_authorized(entry, principal, operations, context, tokens)
            .await
        {
            return Ok(());
        }

        let operation = operations
            .iter()
            .map(|op| op.as_str())
            .collect::<Vec<_>>()
            .join("|");
        Err(denied(entry, principal, &operation))
    }

    /// Resolves the caller's `CreateGrant` entitlement. A policy allow is
    /// unrestricted; otherwise every active grant and valid token carrying
    /// `CreateGrant` is collected as a delegation bound.
    async fn create_grant_authority(
        &self,
        entry: &KeyEntry,
        caller: &Principal,
        tokens: &[String],
    ) -> Result<GrantAuthority, KmsError> {
        use crate::policy::PolicyDecision;

        let op = GrantOperation::CreateGrant;
        match entry.policy.evaluate(caller, &op.policy_action()) {
            PolicyDecision::Allow => return Ok(GrantAuthority::Policy),
            PolicyDecision::Deny => return Err(denied(entry, caller, op.as_str())),
            PolicyDecision::NotApplicable => {},
        }

        let key_id = &entry.metadata.key_id;
        let shard = self.shards.read().await.get(key_id).cloned();
        let shard = match &shard {
            Some(shard) => Some(shard.read().await),
            None => None,
        };

        let mut delegations: Vec<Delegation> = match &shard {
            Some(shard) => shard
                .grants
                .values()
                .filter(|g| &g.grantee == caller && g.operations.contains(&op))
                .map(|g| Delegation {
                    operations: g.operations.clone(),
                    constraints: g.constraints.clone(),
                })
                .collect(),
            None => Vec::new(),
        };
        delegations.extend(
            tokens
                .iter()
                .filter_map(|t| self.signer.verify(t))
                .filter(|c| {
                    &c.kid == key_id
                        && &c.grantee == caller
                        && c.ops.contains(&op)
                        && !shard.as_ref().is_some_and(|s| s.retired.contains(&c.gid))
                })
                .map(|c| Delegation {
                    operations: c.ops.into_iter().collect(),
                    constraints: c.constraints,
                }),
        );

        if delegations.is_empty() {
            return Err(denied(entry, caller, op.as_str()));
        }
        Ok(GrantAuthority::Delegated(delegations))
    }

    /// Evaluates, for any of `operations`: explicit policy deny, then policy
    /// allow, then active grants, then grant tokens.
    pub(crate) async fn is_authorized(
        &self,
        entry: &KeyEntry,
        principal: &Principal,
        operations: &[GrantOperation],
        context: &EncryptionContext,
        tokens: &[String],
    ) -> bool {
        use crate::policy::PolicyDecision;

        let key_id = &entry.metadata.key_id;
        let shard = self.shards.read().await.get(key_id).cloned();
        let shard = match &shard {
            Some(shard) => Some(shard.read().await),
            None => None,
        };
        let claims: Vec<GrantClaims> = tokens
            .iter()
            .filter_map(|t| self.signer.verify(t))
            .filter(|c| &c.kid == key_id && &c.grantee == principal)
            .collect();

        for &operation in operations {
            match entry.policy.evaluate(principal, &operation.policy_action()) {
                PolicyDecision::Deny => continue,
                PolicyDecision::Allow => return true,
                PolicyDecision::NotApplicable => {},
            }

            if let Some(shard) = &shard {
                if shard
                    .grants
                    .values()
                    .any(|g| g.permits(principal, operation, context))
                {
                    return true;
                }
            }

            let by_token = claims.iter().any(|c| {
                c.ops.contains(&operation)
                    && c.constraints.as_ref().map_or(true, |k| k.permits(context))
                    && !shard.as_ref().is_some_and(|s| s.retired.contains(&c.gid))
            });
            if by_token {
                return true;
            }
        }

        false
    }

    async fn remove_grant(
        &self,
        caller: &Principal,
        key_id: &str,
        grant_id: &str,
        dry_run: bool,
        allowed: impl FnOnce(&Grant, &KeyEntry) -> bool,
    ) -> Result<Outcome<()>, KmsError> {
        let entry = self.keys.entry(key_id).await?;
        let entry = entry.read().await;
        entry.ensure_live()?;

        let shard = self
            .shards
            .read()
            .await
            .get(key_id)
            .cloned()
            .ok_or_else(|| KmsError::GrantNotFound(grant_id.to_string()))?;
        let mut shard = shard.write().await;

        let grant = shard
            .grants
            .get(grant_id)
            .ok_or_else(|| KmsError::GrantNotFound(grant_id.to_string()))?;
        if !allowed(grant, &*entry) {
            warn!(key_id = %key_id, grant_id = %grant_id, principal = %caller, "grant removal denied");
            return Err(KmsError::Unauthorized {
                principal: caller.to_string(),
                operation: "RetireGrant|RevokeGrant".into(),
                resource: grant_id.to_string(),
            });
        }
        if dry_run {
            return Ok(Outcome::DryRun);
        }

        let tombstone = serde_json::to_vec(&Tombstone {
            retired_at: unix_now(),
            by: caller.clone(),
        })
        .map_err(|e| KmsError::Storage(e.to_string()))?;
        self.backend
            .put(&tombstone_path(key_id, grant_id), &tombstone)
            .await?;
        self.backend.delete(&grant_path(key_id, grant_id)).await?;

        shard.grants.remove(grant_id);
        shard.retired.insert(grant_id.to_string());
        self.index.write().await.remove(grant_id);

        warn!(key_id = %key_id, grant_id = %grant_id, principal = %caller, "grant removed");
        Ok(Outcome::Completed(()))
    }

    async fn shard(&self, key_id: &str) -> Arc<RwLock<GrantShard>> {
        if let Some(shard) = self.shards.read().await.get(key_id) {
            return shard.clone();
        }
        self.shards
            .write()
            .await
            .entry(key_id.to_string())
            .or_default()
            .clone()
    }
}

fn denied(entry: &KeyEntry, principal: &Principal, operation: &str) -> KmsError {
    warn!(
        key_id = %entry.metadata.key_id,
        principal = %principal,
        operation = %operation,
        "request denied"
    );
    KmsError::Unauthorized {
        principal: principal.to_string(),
        operation: operation.to_string(),
        resource: entry.metadata.arn.clone(),
    }
}

fn grant_path(key_id: &str, grant_id: &str) -> String {
    format!("{GRANT_PREFIX}{key_id}/{grant_id}")
}

fn tombstone_path(key_id: &str, grant_id: &str) -> String {
    format!("{TOMBSTONE_PREFIX}{key_id}/{grant_id}")
}

fn validate_grant_name(name: &str) -> Result<(), KmsError> {
    let valid = !name.is_empty()
        && name.chars().count() <= MAX_GRANT_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '/' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(KmsError::Validation(format!("invalid grant name: {name:?}")))
    }
}

/// Rejects requests carrying too many grant tokens.
pub(crate) fn validate_tokens(tokens: &[String]) -> Result<(), KmsError> {
    if tokens.len() > MAX_GRANT_TOKENS {
        return Err(KmsError::Validation(format!(
            "at most {MAX_GRANT_TOKENS} grant tokens are allowed"
        )));
    }
    Ok(())
}
