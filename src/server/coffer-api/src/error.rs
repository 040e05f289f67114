//! External error taxonomy.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use coffer_kms::KmsError;

/// Error kinds reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The key does not exist.
    KeyNotFoundError,
    /// The key's state does not allow the transition.
    InvalidStateTransitionError,
    /// Usage and key spec do not go together.
    InvalidKeySpecError,
    /// The key cannot perform the operation.
    UnsupportedOperationForKeyError,
    /// The key policy is malformed or would lock the caller out.
    MalformedPolicyError,
    /// The caller is not allowed to perform the operation.
    AuthorizationError,
    /// The key cannot be used in its current state.
    KeyUnavailableError,
    /// The ciphertext was produced by another key.
    IncorrectKeyError,
    /// The ciphertext is malformed, tampered with or bound to another context.
    InvalidCiphertextError,
    /// A same-named grant exists with different parameters.
    DuplicateGrantNameConflictError,
    /// The request is malformed.
    ValidationError,
    /// The grant does not exist.
    NotFoundError,
    /// Storage or cryptographic failure inside the service.
    InternalError,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyNotFoundError => "KeyNotFoundError",
            Self::InvalidStateTransitionError => "InvalidStateTransitionError",
            Self::InvalidKeySpecError => "InvalidKeySpecError",
            Self::UnsupportedOperationForKeyError => "UnsupportedOperationForKeyError",
            Self::MalformedPolicyError => "MalformedPolicyError",
            Self::AuthorizationError => "AuthorizationError",
            Self::KeyUnavailableError => "KeyUnavailableError",
            Self::IncorrectKeyError => "IncorrectKeyError",
            Self::InvalidCiphertextError => "InvalidCiphertextError",
            Self::DuplicateGrantNameConflictError => "DuplicateGrantNameConflictError",
            Self::ValidationError => "ValidationError",
            Self::NotFoundError => "NotFoundError",
            Self::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every dispatcher operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{kind}: {message}")]
#[serde(rename_all = "PascalCase")]
pub struct ApiError {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Creates an error of `kind`.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a `ValidationError`.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }
}

impl From<KmsError> for ApiError {
    fn from(err: KmsError) -> Self {
        let kind = match &err {
            KmsError::KeyNotFound(_) => ErrorKind::KeyNotFoundError,
            KmsError::GrantNotFound(_) => ErrorKind::NotFoundError,
            KmsError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransitionError,
            KmsError::InvalidKeySpec(_) => ErrorKind::InvalidKeySpecError,
            KmsError::UnsupportedOperationForKey { .. } => {
                ErrorKind::UnsupportedOperationForKeyError
            },
            KmsError::MalformedPolicy(_) => ErrorKind::MalformedPolicyError,
            KmsError::Unauthorized { .. } => ErrorKind::AuthorizationError,
            KmsError::KeyUnavailable { .. } => ErrorKind::KeyUnavailableError,
            KmsError::IncorrectKey { .. } => ErrorKind::IncorrectKeyError,
            KmsError::InvalidCiphertext => ErrorKind::InvalidCiphertextError,
            KmsError::DuplicateGrantNameConflict { .. } => {
                ErrorKind::DuplicateGrantNameConflictError
            },
            KmsError::Validation(_) => ErrorKind::ValidationError,
            KmsError::Storage(_) | KmsError::Crypto(_) => {
                error!(error = %err, "internal failure");
                return Self::new(ErrorKind::InternalError, "internal error");
            },
        };
        Self::new(kind, err.to_string())
    }
}
