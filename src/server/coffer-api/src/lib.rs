//! # Coffer API
//!
//! Request dispatcher in front of the Coffer KMS core.
//!
//! ## Operations
//!
//! - Keys: CreateKey, DescribeKey, ListKeys, EnableKey, DisableKey,
//!   ScheduleKeyDeletion, CancelKeyDeletion, ImportKeyMaterial,
//!   DeleteImportedKeyMaterial, RotateKeyOnDemand, ReplicateKey, DeleteReplica
//! - Grants: CreateGrant, ListGrants, RetireGrant, RevokeGrant
//! - Cryptography: GenerateDataKey, GenerateDataKeyWithoutPlaintext, Encrypt,
//!   Decrypt, ReEncrypt, GenerateMac, VerifyMac
//!
//! Transport, request signing and wire encoding belong to the host.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod requests;
pub mod responses;

pub use coffer_kms::Outcome;
pub use dispatcher::{CallerContext, Dispatcher};
pub use error::{ApiError, ErrorKind};
