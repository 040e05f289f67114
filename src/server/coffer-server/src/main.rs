//! Coffer Server - Main entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use coffer_api::Dispatcher;
use coffer_crypto::RootKey;
use coffer_kms::KmsConfig;
use coffer_storage::{MemoryBackend, StorageBackend};
use coffer_storage_sqlite::SqliteBackend;

#[derive(Parser)]
#[command(name = "coffer-server")]
#[command(about = "Coffer - envelope encryption key management")]
#[command(version)]
struct Cli {
    /// Directory holding the per-tenant databases
    #[arg(long, default_value = "data", env = "COFFER_DATA_DIR")]
    data_dir: PathBuf,

    /// Tenant served by this process
    #[arg(long, default_value = "default", env = "COFFER_TENANT")]
    tenant: String,

    /// Region embedded in key ARNs
    #[arg(long, default_value = "local-1", env = "COFFER_REGION")]
    region: String,

    /// Account owning the keys
    #[arg(long, default_value = "000000000000", env = "COFFER_ACCOUNT_ID")]
    account_id: String,

    /// Root key, base64-encoded 32 bytes
    #[arg(long, env = "COFFER_ROOT_KEY", hide_env_values = true)]
    root_key: Option<String>,

    /// Enable development mode (in-memory storage, generated root key)
    #[arg(long, env = "COFFER_DEV_MODE")]
    dev: bool,

    /// Seconds between deletion sweeps
    #[arg(long, default_value_t = 3600, env = "COFFER_PURGE_INTERVAL_SECS")]
    purge_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Coffer server...");
    tracing::info!(region = %cli.region, account_id = %cli.account_id, "KMS identity");

    let (backend, root_key) = open_storage(&cli).await?;
    let config = KmsConfig::new(cli.region.clone(), cli.account_id.clone());
    let dispatcher = Dispatcher::open(backend, root_key, config)
        .await
        .context("failed to open the KMS core")?;

    let period = Duration::from_secs(cli.purge_interval_secs.max(1));
    let sweeper = tokio::spawn(sweep(dispatcher, period));

    tracing::info!("Coffer server started successfully");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    sweeper.abort();

    Ok(())
}

async fn open_storage(cli: &Cli) -> anyhow::Result<(Arc<dyn StorageBackend>, RootKey)> {
    if cli.dev {
        tracing::warn!("Development mode enabled - DO NOT USE IN PRODUCTION");
        let root_key = match cli.root_key.as_deref() {
            Some(encoded) => decode_root_key(encoded)?,
            None => RootKey::generate(),
        };
        return Ok((Arc::new(MemoryBackend::new()), root_key));
    }

    let encoded = cli
        .root_key
        .as_deref()
        .context("COFFER_ROOT_KEY is required outside development mode")?;
    let root_key = decode_root_key(encoded)?;

    let backend = SqliteBackend::open(&cli.data_dir, &cli.tenant)
        .await
        .with_context(|| format!("failed to open storage in {}", cli.data_dir.display()))?
        .with_actor("coffer-server");
    tracing::info!(path = %backend.db_path().display(), tenant = %cli.tenant, "storage opened");

    Ok((Arc::new(backend), root_key))
}

fn decode_root_key(encoded: &str) -> anyhow::Result<RootKey> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(encoded.trim())
            .context("COFFER_ROOT_KEY is not valid base64")?,
    );
    RootKey::from_bytes(&bytes).context("COFFER_ROOT_KEY must decode to 32 bytes")
}

/// Periodically purges keys whose deletion waiting period has elapsed.
async fn sweep(dispatcher: Dispatcher, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match dispatcher.purge_expired(unix_now()).await {
            Ok(report) if report.deleted.is_empty() && report.expired_material.is_empty() => {
                tracing::debug!("nothing to purge");
            },
            Ok(report) => tracing::info!(
                deleted = report.deleted.len(),
                expired_material = report.expired_material.len(),
                "purge completed"
            ),
            Err(e) => tracing::error!(error = %e, "purge failed"),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_root_key() {
        let encoded = BASE64.encode([7u8; 32]);
        let key = decode_root_key(&format!("{encoded}\n")).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);

        assert!(decode_root_key("not base64!").is_err());
        assert!(decode_root_key(&BASE64.encode([7u8; 16])).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["coffer-server", "--dev"]);
        assert!(cli.dev);
        assert_eq!(cli.tenant, "default");
        assert_eq!(cli.purge_interval_secs, 3600);
    }
}
