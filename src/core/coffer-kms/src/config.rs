//! KMS engine configuration.

use serde::{Deserialize, Serialize};

/// Shortest deletion waiting period, in days.
pub const MIN_PENDING_WINDOW_DAYS: u32 = 7;

/// Longest deletion waiting period, in days.
pub const MAX_PENDING_WINDOW_DAYS: u32 = 30;

/// Settings shared by every KMS component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsConfig {
    /// Region this node serves; part of every key ARN.
    pub region: String,
    /// Account that owns the keys.
    pub account_id: String,
    /// Waiting period applied when a deletion request names none.
    pub default_pending_window_days: u32,
    /// Number of audit events kept in memory.
    pub audit_capacity: usize,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            region: "local-1".to_string(),
            account_id: "000000000000".to_string(),
            default_pending_window_days: MAX_PENDING_WINDOW_DAYS,
            audit_capacity: 10_000,
        }
    }
}

impl KmsConfig {
    /// Creates a configuration for `region` and `account_id` with default limits.
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    /// ARN prefix of keys in this region and account.
    pub fn key_arn_prefix(&self) -> String {
        format!("arn:coffer:kms:{}:{}:key/", self.region, self.account_id)
    }

    /// ARN of `key_id`.
    pub fn key_arn(&self, key_id: &str) -> String {
        format!("{}{key_id}", self.key_arn_prefix())
    }
}
