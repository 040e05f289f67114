//! Integration tests for Coffer.
//!
//! These tests drive the dispatcher end to end over the SQLite backend,
//! including restarts against the same data directory.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tempfile::TempDir;
use zeroize::Zeroizing;

use coffer_api::{CallerContext, Dispatcher};
use coffer_crypto::RootKey;
use coffer_kms::KmsConfig;
use coffer_storage_sqlite::{HistoryEntry, SqliteBackend};

/// Tenant used by every test instance.
pub const TENANT: &str = "integration";

/// Actor recorded in the storage history.
pub const ACTOR: &str = "coffer-integration";

/// Account owning the test keys.
pub const ACCOUNT: &str = "111122223333";

// ============================================================================
// Test KMS
// ============================================================================

/// A KMS instance over its own SQLite data directory.
pub struct TestKms {
    /// Dispatcher of the running instance.
    pub dispatcher: Dispatcher,
    root_key: Zeroizing<Vec<u8>>,
    data_dir: TempDir,
}

impl TestKms {
    /// Starts an instance with a fresh data directory and root key.
    pub async fn start() -> Result<Self> {
        let data_dir = TempDir::new().context("Failed to create temp dir")?;
        let root_key = Zeroizing::new(RootKey::generate().as_bytes().to_vec());
        let dispatcher = open(&data_dir, &root_key).await?;

        Ok(Self {
            dispatcher,
            root_key,
            data_dir,
        })
    }

    /// Stops the instance and starts a new one over the same directory.
    pub async fn restart(self) -> Result<Self> {
        let Self {
            dispatcher,
            root_key,
            data_dir,
        } = self;
        drop(dispatcher);

        let dispatcher = open(&data_dir, &root_key).await?;
        Ok(Self {
            dispatcher,
            root_key,
            data_dir,
        })
    }

    /// Opens a second instance over the same directory with another root key.
    pub async fn open_with_root_key(&self, root_key: &[u8]) -> Result<Dispatcher> {
        open(&self.data_dir, root_key).await
    }

    /// Storage write history of `path`.
    pub async fn history(&self, path: &str) -> Result<Vec<HistoryEntry>> {
        let backend = SqliteBackend::open(self.data_dir.path(), TENANT).await?;
        Ok(backend.history(path).await?)
    }
}

async fn open(data_dir: &TempDir, root_key: &[u8]) -> Result<Dispatcher> {
    let backend = SqliteBackend::open(data_dir.path(), TENANT)
        .await
        .context("Failed to open SQLite backend")?
        .with_actor(ACTOR);
    let root_key = RootKey::from_bytes(root_key)?;

    Ok(Dispatcher::open(
        Arc::new(backend),
        root_key,
        KmsConfig::new("eu-west-1", ACCOUNT),
    )
    .await?)
}

/// Caller context for a principal of the test account.
pub fn caller(name: &str) -> CallerContext {
    CallerContext::new(format!("arn:coffer:iam::{ACCOUNT}:{name}"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_api::requests::*;
    use coffer_api::ErrorKind;
    use coffer_kms::EncryptionContext;

    fn admin() -> CallerContext {
        caller("user/admin")
    }

    fn app() -> CallerContext {
        caller("role/app")
    }

    async fn create_key(dispatcher: &Dispatcher) -> String {
        dispatcher
            .create_key(&admin(), CreateKeyRequest::default())
            .await
            .unwrap()
            .key_metadata
            .key_id
    }

    async fn grant(dispatcher: &Dispatcher, key_id: &str, operations: &[&str]) -> (String, String) {
        let created = dispatcher
            .create_grant(
                &admin(),
                CreateGrantRequest {
                    key_id: key_id.to_string(),
                    grantee_principal: Some(app().principal.to_string()),
                    retiring_principal: Some(admin().principal.to_string()),
                    operations: operations.iter().map(|op| op.to_string()).collect(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        (created.grant_id, created.grant_token)
    }

    fn data_key_request(key_id: &str, ctx: &EncryptionContext) -> GenerateDataKeyRequest {
        GenerateDataKeyRequest {
            key_id: key_id.to_string(),
            key_spec: Some("AES_256".into()),
            encryption_context: ctx.clone(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_envelope_workflow() {
        let kms = TestKms::start().await.unwrap();
        let d = &kms.dispatcher;
        let k1 = create_key(d).await;
        let k2 = create_key(d).await;

        let created = d
            .create_grant(
                &admin(),
                CreateGrantRequest {
                    key_id: k1.clone(),
                    grantee_principal: Some(app().principal.to_string()),
                    operations: vec!["GenerateDataKey".into(), "Decrypt".into()],
                    constraints: Some(GrantConstraintsDto {
                        encryption_context_subset: Some(
                            EncryptionContext::new().with("tenant", "acme"),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();

        let ctx = EncryptionContext::new()
            .with("tenant", "acme")
            .with("file", "invoice-42.pdf");
        let data_key = d
            .generate_data_key(
                &app(),
                GenerateDataKeyRequest {
                    grant_tokens: vec![created.grant_token.clone()],
                    ..data_key_request(&k1, &ctx)
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();

        let decrypted = d
            .decrypt(
                &app(),
                DecryptRequest {
                    ciphertext_blob: data_key.ciphertext_blob.clone(),
                    encryption_context: ctx.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(decrypted.plaintext, data_key.plaintext);

        // the app holds no rights on k2
        let err = d
            .re_encrypt(
                &app(),
                ReEncryptRequest {
                    ciphertext_blob: data_key.ciphertext_blob.clone(),
                    source_encryption_context: ctx.clone(),
                    destination_key_id: k2.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthorizationError);

        let ctx2 = EncryptionContext::new().with("tenant", "acme-archive");
        let moved = d
            .re_encrypt(
                &admin(),
                ReEncryptRequest {
                    ciphertext_blob: data_key.ciphertext_blob,
                    source_encryption_context: ctx,
                    destination_key_id: k2.clone(),
                    destination_encryption_context: ctx2.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert!(moved.source_key_id.ends_with(&k1));
        assert!(moved.key_id.ends_with(&k2));

        let final_plaintext = d
            .decrypt(
                &admin(),
                DecryptRequest {
                    ciphertext_blob: moved.ciphertext_blob,
                    key_id: Some(k2),
                    encryption_context: ctx2,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(final_plaintext.plaintext, data_key.plaintext);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let kms = TestKms::start().await.unwrap();
        let key_id = create_key(&kms.dispatcher).await;
        let disabled = create_key(&kms.dispatcher).await;
        let ctx = EncryptionContext::new().with("purpose", "restart");

        let (kept_grant, kept_token) = grant(&kms.dispatcher, &key_id, &["Decrypt"]).await;
        let (_, retired_token) = grant(&kms.dispatcher, &key_id, &["GenerateDataKey"]).await;
        kms.dispatcher
            .retire_grant(
                &app(),
                RetireGrantRequest {
                    grant_token: Some(retired_token.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        kms.dispatcher
            .disable_key(&admin(), KeyRequest::new(&disabled))
            .await
            .unwrap();

        let data_key = kms
            .dispatcher
            .generate_data_key(&admin(), data_key_request(&key_id, &ctx))
            .await
            .unwrap()
            .completed()
            .unwrap();

        let kms = kms.restart().await.unwrap();
        let d = &kms.dispatcher;

        let described = d
            .describe_key(
                &admin(),
                DescribeKeyRequest {
                    key_id: key_id.clone(),
                    grant_tokens: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(described.key_metadata.key_state, "Enabled");

        let decrypted = d
            .decrypt(
                &app(),
                DecryptRequest {
                    ciphertext_blob: data_key.ciphertext_blob,
                    encryption_context: ctx.clone(),
                    grant_tokens: vec![kept_token],
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(decrypted.plaintext, data_key.plaintext);

        let err = d
            .generate_data_key(
                &app(),
                GenerateDataKeyRequest {
                    grant_tokens: vec![retired_token],
                    ..data_key_request(&key_id, &ctx)
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthorizationError);

        let grants = d
            .list_grants(
                &admin(),
                ListGrantsRequest {
                    key_id: key_id.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .grants;
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].grant_id, kept_grant);

        let err = d
            .generate_data_key(&admin(), data_key_request(&disabled, &ctx))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyUnavailableError);
    }

    #[tokio::test]
    async fn test_rotation_survives_restart() {
        let kms = TestKms::start().await.unwrap();
        let key_id = create_key(&kms.dispatcher).await;
        let ctx = EncryptionContext::new();

        let before = kms
            .dispatcher
            .generate_data_key(&admin(), data_key_request(&key_id, &ctx))
            .await
            .unwrap()
            .completed()
            .unwrap();
        kms.dispatcher
            .rotate_key_on_demand(&admin(), KeyRequest::new(&key_id))
            .await
            .unwrap();

        let kms = kms.restart().await.unwrap();
        let described = kms
            .dispatcher
            .describe_key(
                &admin(),
                DescribeKeyRequest {
                    key_id: key_id.clone(),
                    grant_tokens: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(described.key_metadata.current_key_material_version, 2);

        let decrypted = kms
            .dispatcher
            .decrypt(
                &admin(),
                DecryptRequest {
                    ciphertext_blob: before.ciphertext_blob,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(decrypted.plaintext, before.plaintext);
    }

    #[tokio::test]
    async fn test_purge_survives_restart() {
        let kms = TestKms::start().await.unwrap();
        let key_id = create_key(&kms.dispatcher).await;
        grant(&kms.dispatcher, &key_id, &["Decrypt"]).await;

        let scheduled = kms
            .dispatcher
            .schedule_key_deletion(
                &admin(),
                ScheduleKeyDeletionRequest {
                    key_id: key_id.clone(),
                    pending_window_in_days: Some(7),
                },
            )
            .await
            .unwrap();
        let deletion_date = scheduled.deletion_date.unwrap();

        let kms = kms.restart().await.unwrap();
        let report = kms.dispatcher.purge_expired(deletion_date).await.unwrap();
        assert_eq!(report.deleted, vec![key_id.clone()]);

        let kms = kms.restart().await.unwrap();
        let err = kms
            .dispatcher
            .describe_key(
                &admin(),
                DescribeKeyRequest {
                    key_id: key_id.clone(),
                    grant_tokens: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyNotFoundError);
        assert!(kms.dispatcher.list_keys(&admin()).await.unwrap().keys.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_root_key_is_rejected() {
        let kms = TestKms::start().await.unwrap();
        create_key(&kms.dispatcher).await;

        let err = kms
            .open_with_root_key(RootKey::generate().as_bytes())
            .await
            .unwrap_err();
        let api_error = err.downcast_ref::<coffer_api::ApiError>().unwrap();
        assert_eq!(api_error.kind, ErrorKind::InternalError);
    }

    #[tokio::test]
    async fn test_storage_history_records_actor() {
        let kms = TestKms::start().await.unwrap();
        let key_id = create_key(&kms.dispatcher).await;
        kms.dispatcher
            .disable_key(&admin(), KeyRequest::new(&key_id))
            .await
            .unwrap();

        let history = kms.history(&format!("keys/{key_id}")).await.unwrap();
        let operations: Vec<_> = history.iter().map(|h| h.operation.as_str()).collect();
        assert_eq!(operations, vec!["create", "update"]);
        assert!(history.iter().all(|h| h.actor.as_deref() == Some(ACTOR)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients() {
        let kms = TestKms::start().await.unwrap();
        let key_id = create_key(&kms.dispatcher).await;
        let dispatcher = kms.dispatcher.clone();

        let mut handles = Vec::new();
        for i in 0..16 {
            let dispatcher = dispatcher.clone();
            let key_id = key_id.clone();
            handles.push(tokio::spawn(async move {
                let ctx = EncryptionContext::new().with("request", i.to_string());
                let data_key = dispatcher
                    .generate_data_key(&admin(), data_key_request(&key_id, &ctx))
                    .await
                    .unwrap()
                    .completed()
                    .unwrap();
                let decrypted = dispatcher
                    .decrypt(
                        &admin(),
                        DecryptRequest {
                            ciphertext_blob: data_key.ciphertext_blob,
                            encryption_context: ctx,
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap()
                    .completed()
                    .unwrap();
                assert_eq!(decrypted.plaintext, data_key.plaintext);
                data_key.plaintext.to_vec()
            }));
        }

        let mut plaintexts = Vec::new();
        for handle in handles {
            plaintexts.push(handle.await.unwrap());
        }
        plaintexts.sort();
        plaintexts.dedup();
        assert_eq!(plaintexts.len(), 16);
    }

    #[tokio::test]
    async fn test_requests_from_json() {
        let kms = TestKms::start().await.unwrap();
        let key_id = create_key(&kms.dispatcher).await;

        let request: CreateGrantRequest = serde_json::from_value(serde_json::json!({
            "KeyId": key_id,
            "GranteePrincipal": app().principal.to_string(),
            "Operations": ["Encrypt", "Decrypt"],
            "Name": "billing-service",
        }))
        .unwrap();

        let first = kms
            .dispatcher
            .create_grant(&admin(), request.clone())
            .await
            .unwrap()
            .completed()
            .unwrap();
        let second = kms
            .dispatcher
            .create_grant(&admin(), request)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(first.grant_id, second.grant_id);
        assert_ne!(first.grant_token, second.grant_token);

        let request: EncryptRequest = serde_json::from_value(serde_json::json!({
            "KeyId": key_id,
            "Plaintext": [104, 105],
            "GrantTokens": [second.grant_token],
        }))
        .unwrap();
        let encrypted = kms
            .dispatcher
            .encrypt(&app(), request)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert!(encrypted.key_id.contains(":eu-west-1:111122223333:key/"));
    }
}
