//! # Coffer Storage - SQLite Backend
//!
//! SQLite implementation of the storage backend with tenant isolation.
//! Each tenant gets its own database file, and every write is mirrored into a
//! history table together with the acting principal.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use coffer_storage::{StorageBackend, StorageError};

/// One row of the write history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// `create`, `update` or `delete`.
    pub operation: String,
    /// Version of the entry after the write.
    pub version: i64,
    /// Actor recorded with the write, if any.
    pub actor: Option<String>,
    /// Unix timestamp of the write.
    pub timestamp: i64,
}

/// SQLite storage backend with tenant isolation.
///
/// Each tenant gets its own database file at `{base_path}/{tenant}.db`.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    actor: Option<String>,
    db_path: PathBuf,
}

impl SqliteBackend {
    /// Opens or creates the database for a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant name is invalid, the directory cannot be
    /// created, or the connection or migrations fail.
    pub async fn open(base_path: impl AsRef<Path>, tenant: &str) -> Result<Self, StorageError> {
        Self::validate_tenant(tenant)?;

        let base = base_path.as_ref();
        std::fs::create_dir_all(base).map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{tenant}.db"));
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        debug!(tenant = %tenant, path = %db_path.display(), "Opening SQLite database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self {
            pool,
            actor: None,
            db_path,
        };

        backend.migrate().await?;

        info!(tenant = %tenant, "SQLite backend ready");

        Ok(backend)
    }

    /// Returns a copy of this backend that records `actor` in the history.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Path of the tenant database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Only lowercase letters, digits, underscore and hyphen are accepted.
    fn validate_tenant(tenant: &str) -> Result<(), StorageError> {
        if tenant.is_empty() {
            return Err(StorageError::InvalidInput("tenant cannot be empty".into()));
        }

        if tenant.len() > 64 {
            return Err(StorageError::InvalidInput("tenant name too long".into()));
        }

        let valid = tenant
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "tenant must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("Running database migrations");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY,
                value      BLOB NOT NULL,
                version    INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS kv_history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                key        TEXT NOT NULL,
                version    INTEGER NOT NULL,
                operation  TEXT NOT NULL,
                actor      TEXT,
                timestamp  INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_history_key ON kv_history (key)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;
        }

        debug!("Migrations complete");

        Ok(())
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    /// Returns the write history of `key`, oldest first.
    ///
    /// Values are never copied into the history; only the operation, version
    /// and actor are kept.
    pub async fn history(&self, key: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        let rows: Vec<(String, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT operation, version, actor, timestamp FROM kv_history WHERE key = ? ORDER BY id",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(operation, version, actor, timestamp)| HistoryEntry {
                operation,
                version,
                actor,
                timestamp,
            })
            .collect())
    }

    async fn record_history(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        key: &str,
        version: i64,
        operation: &str,
        now: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_history (key, version, operation, actor, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(version)
        .bind(operation)
        .bind(self.actor.as_deref())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let now = Self::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT version FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let (version, operation) = match existing {
            Some((v,)) => (v + 1, "update"),
            None => (1, "create"),
        };

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(version)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        self.record_history(&mut tx, key, version, operation, now)
            .await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let now = Self::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let inserted = sqlx::query(
            "INSERT INTO kv_store (key, value, version, created_at, updated_at) VALUES (?, ?, 1, ?, ?) ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?
        .rows_affected();

        if inserted == 0 {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        self.record_history(&mut tx, key, 1, "create", now).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT version FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if let Some((version,)) = existing {
            sqlx::query("DELETE FROM kv_store WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

            self.record_history(&mut tx, key, version + 1, "delete", Self::now())
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM kv_store WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteBackend) {
        let tmp = TempDir::new().unwrap();
        let backend = SqliteBackend::open(tmp.path(), "test-tenant")
            .await
            .unwrap();
        (tmp, backend)
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let (tmp, backend) = setup().await;
        assert_eq!(backend.db_path(), tmp.path().join("test-tenant.db"));
        assert!(backend.db_path().exists());
    }

    #[tokio::test]
    async fn test_tenant_validation() {
        let tmp = TempDir::new().unwrap();

        for name in ["", "Tenant", "my tenant", "../escape", "tenant.db"] {
            let result = SqliteBackend::open(tmp.path(), name).await;
            assert!(
                matches!(result, Err(StorageError::InvalidInput(_))),
                "should reject tenant name: {name:?}"
            );
        }

        for name in ["kms", "eu-west-1", "tenant_1"] {
            assert!(SqliteBackend::open(tmp.path(), name).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let (_tmp, backend) = setup().await;

        assert!(backend.get("keys/k1").await.unwrap().is_none());

        backend.put("keys/k1", b"record-v1").await.unwrap();
        assert_eq!(
            backend.get("keys/k1").await.unwrap(),
            Some(b"record-v1".to_vec())
        );

        backend.put("keys/k1", b"record-v2").await.unwrap();
        assert_eq!(
            backend.get("keys/k1").await.unwrap(),
            Some(b"record-v2".to_vec())
        );

        backend.delete("keys/k1").await.unwrap();
        assert!(backend.get("keys/k1").await.unwrap().is_none());

        // deleting again is fine
        backend.delete("keys/k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_if_absent_is_exclusive() {
        let (_tmp, backend) = setup().await;

        backend.put_if_absent("keys/k1", b"first").await.unwrap();
        let result = backend.put_if_absent("keys/k1", b"second").await;

        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
        assert_eq!(backend.get("keys/k1").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_list_prefix_treats_wildcards_literally() {
        let (_tmp, backend) = setup().await;

        backend.put("grants/k_1/g1", b"1").await.unwrap();
        backend.put("grants/k_1/g2", b"2").await.unwrap();
        backend.put("grants/kx1/g3", b"3").await.unwrap();
        backend.put("keys/k_1", b"4").await.unwrap();

        assert_eq!(
            backend.list("grants/k_1/").await.unwrap(),
            vec!["grants/k_1/g1", "grants/k_1/g2"]
        );
        assert_eq!(backend.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_history_records_actor_and_operations() {
        let (_tmp, backend) = setup().await;
        let backend = backend.with_actor("arn:coffer:iam::111122223333:root");

        backend.put_if_absent("keys/k1", b"v1").await.unwrap();
        backend.put("keys/k1", b"v2").await.unwrap();
        backend.delete("keys/k1").await.unwrap();

        let history = backend.history("keys/k1").await.unwrap();
        let ops: Vec<(&str, i64)> = history
            .iter()
            .map(|h| (h.operation.as_str(), h.version))
            .collect();

        assert_eq!(ops, vec![("create", 1), ("update", 2), ("delete", 3)]);
        assert!(history
            .iter()
            .all(|h| h.actor.as_deref() == Some("arn:coffer:iam::111122223333:root")));
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let tmp = TempDir::new().unwrap();

        let eu = SqliteBackend::open(tmp.path(), "eu-west-1").await.unwrap();
        let us = SqliteBackend::open(tmp.path(), "us-east-1").await.unwrap();

        eu.put("keys/shared", b"eu").await.unwrap();
        us.put("keys/shared", b"us").await.unwrap();

        assert_eq!(eu.get("keys/shared").await.unwrap(), Some(b"eu".to_vec()));
        assert_eq!(us.get("keys/shared").await.unwrap(), Some(b"us".to_vec()));
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let tmp = TempDir::new().unwrap();
        {
            let backend = SqliteBackend::open(tmp.path(), "kms").await.unwrap();
            backend.put("keys/k1", &[0u8, 1, 2, 255]).await.unwrap();
        }

        let backend = SqliteBackend::open(tmp.path(), "kms").await.unwrap();
        assert_eq!(
            backend.get("keys/k1").await.unwrap(),
            Some(vec![0u8, 1, 2, 255])
        );
    }
}
