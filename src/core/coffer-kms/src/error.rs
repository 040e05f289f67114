//! KMS engine error types.

use thiserror::Error;

use crate::types::KeyState;

/// Errors that can occur in the KMS Engine.
#[derive(Debug, Error)]
pub enum KmsError {
    /// Key not found.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Grant not found.
    #[error("grant not found: {0}")]
    GrantNotFound(String),

    /// The requested transition is not allowed from the key's current state.
    #[error("cannot {transition} key {key_id} in state {state}")]
    InvalidStateTransition {
        /// Key id.
        key_id: String,
        /// Current state.
        state: KeyState,
        /// Attempted transition.
        transition: String,
    },

    /// Key usage and key spec do not go together, or the spec is unsupported.
    #[error("invalid key spec: {0}")]
    InvalidKeySpec(String),

    /// Operation not allowed for the key's usage or spec.
    #[error("operation {operation} is not supported by key {key_id}")]
    UnsupportedOperationForKey {
        /// Operation name.
        operation: String,
        /// Key id.
        key_id: String,
    },

    /// Key policy is malformed or would lock the caller out.
    #[error("malformed policy: {0}")]
    MalformedPolicy(String),

    /// Principal is not allowed to perform the operation.
    #[error("{principal} is not authorized to perform {operation} on {resource}")]
    Unauthorized {
        /// Calling principal.
        principal: String,
        /// Operation name.
        operation: String,
        /// Key or grant the operation targeted.
        resource: String,
    },

    /// Key exists but cannot be used in its current state.
    #[error("key {key_id} is unavailable in state {state}")]
    KeyUnavailable {
        /// Key id.
        key_id: String,
        /// Current state.
        state: KeyState,
    },

    /// Explicit key does not match the key that produced the ciphertext.
    #[error("ciphertext was not produced by key {expected}")]
    IncorrectKey {
        /// Key the caller named.
        expected: String,
        /// Key embedded in the ciphertext.
        actual: String,
    },

    /// Ciphertext is malformed, tampered with, or bound to another context.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    /// A grant with this name exists with different parameters.
    #[error("grant name {name} is already used on key {key_id} with different parameters")]
    DuplicateGrantNameConflict {
        /// Key id.
        key_id: String,
        /// Grant name.
        name: String,
    },

    /// Request argument out of range or otherwise unusable.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] coffer_crypto::CryptoError),
}

impl From<coffer_storage::StorageError> for KmsError {
    fn from(e: coffer_storage::StorageError) -> Self {
        KmsError::Storage(e.to_string())
    }
}

impl KmsError {
    /// Short stable name of the error kind, used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyNotFound(_) => "KeyNotFound",
            Self::GrantNotFound(_) => "GrantNotFound",
            Self::InvalidStateTransition { .. } => "InvalidStateTransition",
            Self::InvalidKeySpec(_) => "InvalidKeySpec",
            Self::UnsupportedOperationForKey { .. } => "UnsupportedOperationForKey",
            Self::MalformedPolicy(_) => "MalformedPolicy",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::KeyUnavailable { .. } => "KeyUnavailable",
            Self::IncorrectKey { .. } => "IncorrectKey",
            Self::InvalidCiphertext => "InvalidCiphertext",
            Self::DuplicateGrantNameConflict { .. } => "DuplicateGrantNameConflict",
            Self::Validation(_) => "Validation",
            Self::Storage(_) => "Storage",
            Self::Crypto(_) => "Crypto",
        }
    }
}
