//! In-memory audit trail of KMS operations.
//!
//! Events carry identifiers and outcomes only. Plaintext and key material never
//! reach the log.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::KmsError;
use crate::types::{unix_now, Principal};

/// How an audited operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuditOutcome {
    /// The operation succeeded (or passed every check in dry-run mode).
    Success,
    /// The operation failed with the given error kind.
    Failure(String),
}

/// One audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// When the event was recorded (Unix seconds).
    pub timestamp: u64,
    /// Operation name, e.g. `GenerateDataKey`.
    pub operation: String,
    /// Target key, when one was resolved.
    pub key_id: Option<String>,
    /// Calling principal.
    pub principal: String,
    /// Whether the request was a dry run.
    pub dry_run: bool,
    /// Whether master key material was used to wrap, unwrap or sign.
    pub material_used: bool,
    /// Result of the operation.
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    /// Starts an event for `operation` by `principal`.
    pub fn new(operation: &str, principal: &Principal) -> Self {
        Self {
            timestamp: unix_now(),
            operation: operation.to_string(),
            key_id: None,
            principal: principal.as_str().to_string(),
            dry_run: false,
            material_used: false,
            outcome: AuditOutcome::Success,
        }
    }

    /// Sets the target key.
    pub fn key(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Sets the dry-run flag.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Records the outcome of `result`.
    pub fn outcome<T>(mut self, result: &Result<T, KmsError>) -> Self {
        self.outcome = match result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.kind().to_string()),
        };
        self
    }

    /// Marks whether key material was used.
    pub fn material_used(mut self, used: bool) -> Self {
        self.material_used = used;
        self
    }
}

/// Bounded ring of audit events. The oldest events are dropped first.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl AuditLog {
    /// Creates a log keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an event and traces it.
    pub async fn record(&self, event: AuditEvent) {
        match &event.outcome {
            AuditOutcome::Success => info!(
                operation = %event.operation,
                key_id = event.key_id.as_deref().unwrap_or("-"),
                principal = %event.principal,
                dry_run = event.dry_run,
                "kms operation succeeded"
            ),
            AuditOutcome::Failure(kind) => warn!(
                operation = %event.operation,
                key_id = event.key_id.as_deref().unwrap_or("-"),
                principal = %event.principal,
                dry_run = event.dry_run,
                error = %kind,
                "kms operation failed"
            ),
        }

        let mut events = self.events.lock().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of every retained event, oldest first.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    /// Retained events for `key_id`, oldest first.
    pub async fn events_for(&self, key_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.key_id.as_deref() == Some(key_id))
            .cloned()
            .collect()
    }

    /// Number of retained events in which `key_id`'s material was used.
    pub async fn material_uses(&self, key_id: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.material_used && e.key_id.as_deref() == Some(key_id))
            .count()
    }
}
