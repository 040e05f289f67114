//! Key metadata and the enumerations shared by every KMS component.
//!
//! Enumerations travel as the SDK's string constants (`"SYMMETRIC_DEFAULT"`,
//! `"ENCRYPT_DECRYPT"`, ...). Parsing an unknown value yields
//! [`KmsError::Validation`].

use std::fmt;

use serde::{Deserialize, Serialize};

use coffer_crypto::MacAlgorithm;

use crate::error::KmsError;

/// Declares a string-valued enum with `Display`, `FromStr` and serde support.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            /// Wire representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::error::KmsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok($name::$variant), )+
                    other => Err($crate::error::KmsError::Validation(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                raw.parse().map_err(::serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum! {
    /// Lifecycle state of a master key.
    KeyState {
        /// Created without material; waiting for an import.
        PendingImport => "PendingImport",
        /// Usable for cryptographic operations.
        Enabled => "Enabled",
        /// Kept but unusable until re-enabled.
        Disabled => "Disabled",
        /// Scheduled for deletion; purged when the waiting period elapses.
        PendingDeletion => "PendingDeletion",
        /// Primary multi-region key waiting for its replicas to be deleted.
        PendingReplicaDeletion => "PendingReplicaDeletion",
    }
}

impl KeyState {
    /// Whether the key is scheduled for deletion in either form.
    pub fn is_pending_deletion(self) -> bool {
        matches!(self, Self::PendingDeletion | Self::PendingReplicaDeletion)
    }
}

wire_enum! {
    /// What a master key may be used for. Immutable after creation.
    KeyUsage {
        /// Encryption, decryption and data keys.
        EncryptDecrypt => "ENCRYPT_DECRYPT",
        /// HMAC generation and verification.
        GenerateVerifyMac => "GENERATE_VERIFY_MAC",
        /// Signing and verification.
        SignVerify => "SIGN_VERIFY",
        /// Shared secret derivation.
        KeyAgreement => "KEY_AGREEMENT",
    }
}

wire_enum! {
    /// Key family and size. Immutable after creation.
    KeySpec {
        /// AES-256-GCM symmetric key.
        SymmetricDefault => "SYMMETRIC_DEFAULT",
        /// RSA 2048-bit key pair.
        Rsa2048 => "RSA_2048",
        /// RSA 3072-bit key pair.
        Rsa3072 => "RSA_3072",
        /// RSA 4096-bit key pair.
        Rsa4096 => "RSA_4096",
        /// NIST P-256 key pair.
        EccNistP256 => "ECC_NIST_P256",
        /// NIST P-384 key pair.
        EccNistP384 => "ECC_NIST_P384",
        /// NIST P-521 key pair.
        EccNistP521 => "ECC_NIST_P521",
        /// secp256k1 key pair.
        EccSecgP256k1 => "ECC_SECG_P256K1",
        /// HMAC key with SHA-224.
        Hmac224 => "HMAC_224",
        /// HMAC key with SHA-256.
        Hmac256 => "HMAC_256",
        /// HMAC key with SHA-384.
        Hmac384 => "HMAC_384",
        /// HMAC key with SHA-512.
        Hmac512 => "HMAC_512",
        /// SM2 key pair.
        Sm2 => "SM2",
    }
}

impl KeySpec {
    /// Usages this spec can be created with.
    pub fn valid_usages(self) -> &'static [KeyUsage] {
        use KeyUsage::*;
        match self {
            Self::SymmetricDefault => &[EncryptDecrypt],
            Self::Rsa2048 | Self::Rsa3072 | Self::Rsa4096 => &[EncryptDecrypt, SignVerify],
            Self::EccNistP256 | Self::EccNistP384 | Self::EccNistP521 => {
                &[SignVerify, KeyAgreement]
            },
            Self::EccSecgP256k1 => &[SignVerify],
            Self::Hmac224 | Self::Hmac256 | Self::Hmac384 | Self::Hmac512 => &[GenerateVerifyMac],
            Self::Sm2 => &[EncryptDecrypt, SignVerify, KeyAgreement],
        }
    }

    /// Whether `usage` is compatible with this spec.
    pub fn supports_usage(self, usage: KeyUsage) -> bool {
        self.valid_usages().contains(&usage)
    }

    /// Whether this is a symmetric (secret-only) spec.
    pub fn is_symmetric(self) -> bool {
        self == Self::SymmetricDefault || self.mac_algorithm().is_some()
    }

    /// HMAC algorithm backing an HMAC spec.
    pub fn mac_algorithm(self) -> Option<MacAlgorithm> {
        match self {
            Self::Hmac224 => Some(MacAlgorithm::HmacSha224),
            Self::Hmac256 => Some(MacAlgorithm::HmacSha256),
            Self::Hmac384 => Some(MacAlgorithm::HmacSha384),
            Self::Hmac512 => Some(MacAlgorithm::HmacSha512),
            _ => None,
        }
    }

    /// Length of the secret material this engine provisions, if any.
    ///
    /// Asymmetric specs are lifecycle-managed only and carry no material here.
    pub fn material_len(self) -> Option<usize> {
        match self {
            Self::SymmetricDefault => Some(coffer_crypto::aead::KEY_SIZE),
            other => other.mac_algorithm().map(MacAlgorithm::output_len),
        }
    }

    /// Encryption algorithms a key of this spec accepts.
    pub fn encryption_algorithms(self) -> &'static [EncryptionAlgorithm] {
        match self {
            Self::SymmetricDefault => &[EncryptionAlgorithm::SymmetricDefault],
            Self::Rsa2048 | Self::Rsa3072 | Self::Rsa4096 => &[
                EncryptionAlgorithm::RsaesOaepSha1,
                EncryptionAlgorithm::RsaesOaepSha256,
            ],
            Self::Sm2 => &[EncryptionAlgorithm::Sm2Pke],
            _ => &[],
        }
    }
}

wire_enum! {
    /// Where the key material comes from.
    Origin {
        /// Generated inside the KMS.
        Internal => "COFFER_KMS",
        /// Imported by the customer.
        External => "EXTERNAL",
        /// Held in an external key store.
        ExternalStore => "EXTERNAL_KEY_STORE",
    }
}

wire_enum! {
    /// Whether imported material expires.
    ExpirationModel {
        /// Material is removed at `valid_to`.
        KeyMaterialExpires => "KEY_MATERIAL_EXPIRES",
        /// Material stays until deleted.
        KeyMaterialDoesNotExpire => "KEY_MATERIAL_DOES_NOT_EXPIRE",
    }
}

wire_enum! {
    /// Encryption algorithm named in encrypt, decrypt and re-encrypt requests.
    EncryptionAlgorithm {
        /// AES-256-GCM envelope of this engine.
        SymmetricDefault => "SYMMETRIC_DEFAULT",
        /// RSA OAEP with SHA-1.
        RsaesOaepSha1 => "RSAES_OAEP_SHA_1",
        /// RSA OAEP with SHA-256.
        RsaesOaepSha256 => "RSAES_OAEP_SHA_256",
        /// SM2 public key encryption.
        Sm2Pke => "SM2PKE",
    }
}

wire_enum! {
    /// Named data key sizes.
    DataKeySpec {
        /// 128-bit key.
        Aes128 => "AES_128",
        /// 256-bit key.
        Aes256 => "AES_256",
    }
}

wire_enum! {
    /// MAC algorithm named in MAC requests.
    MacAlgorithmSpec {
        /// HMAC-SHA-224.
        HmacSha224 => "HMAC_SHA_224",
        /// HMAC-SHA-256.
        HmacSha256 => "HMAC_SHA_256",
        /// HMAC-SHA-384.
        HmacSha384 => "HMAC_SHA_384",
        /// HMAC-SHA-512.
        HmacSha512 => "HMAC_SHA_512",
    }
}

impl From<MacAlgorithmSpec> for MacAlgorithm {
    fn from(spec: MacAlgorithmSpec) -> Self {
        match spec {
            MacAlgorithmSpec::HmacSha224 => MacAlgorithm::HmacSha224,
            MacAlgorithmSpec::HmacSha256 => MacAlgorithm::HmacSha256,
            MacAlgorithmSpec::HmacSha384 => MacAlgorithm::HmacSha384,
            MacAlgorithmSpec::HmacSha512 => MacAlgorithm::HmacSha512,
        }
    }
}

impl From<MacAlgorithm> for MacAlgorithmSpec {
    fn from(algorithm: MacAlgorithm) -> Self {
        match algorithm {
            MacAlgorithm::HmacSha224 => MacAlgorithmSpec::HmacSha224,
            MacAlgorithm::HmacSha256 => MacAlgorithmSpec::HmacSha256,
            MacAlgorithm::HmacSha384 => MacAlgorithmSpec::HmacSha384,
            MacAlgorithm::HmacSha512 => MacAlgorithmSpec::HmacSha512,
        }
    }
}

/// Largest data key, in bytes.
pub const MAX_DATA_KEY_BYTES: usize = 1024;

/// Requested data key length: a named spec or an explicit byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKeyLength {
    /// Named spec.
    Spec(DataKeySpec),
    /// Explicit length in bytes (1..=1024).
    Bytes(usize),
}

impl DataKeyLength {
    /// Length in bytes, validated.
    pub fn byte_len(self) -> Result<usize, KmsError> {
        match self {
            Self::Spec(DataKeySpec::Aes128) => Ok(16),
            Self::Spec(DataKeySpec::Aes256) => Ok(32),
            Self::Bytes(n) if (1..=MAX_DATA_KEY_BYTES).contains(&n) => Ok(n),
            Self::Bytes(n) => Err(KmsError::Validation(format!(
                "number of bytes must be within 1..={MAX_DATA_KEY_BYTES}, got {n}"
            ))),
        }
    }
}

/// Identity of a caller, as established by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Wraps an identity string.
    pub fn new(arn: impl Into<String>) -> Self {
        Self(arn.into())
    }

    /// Root principal of an account.
    pub fn account_root(account_id: &str) -> Self {
        Self(format!("arn:coffer:iam::{account_id}:root"))
    }

    /// Identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Public metadata of a master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Opaque key id.
    pub key_id: String,
    /// Resource name: `arn:coffer:kms:{region}:{account}:key/{key_id}`.
    pub arn: String,
    /// Owning account.
    pub account_id: String,
    /// Principal that created the key.
    pub owner: Principal,
    /// Free-form description.
    pub description: String,
    /// Current lifecycle state.
    pub state: KeyState,
    /// Usage fixed at creation.
    pub usage: KeyUsage,
    /// Spec fixed at creation.
    pub key_spec: KeySpec,
    /// Material origin.
    pub origin: Origin,
    /// Creation time (Unix seconds).
    pub creation_date: u64,
    /// When the key will be purged, once scheduled and replica-free.
    pub deletion_date: Option<u64>,
    /// Waiting period chosen when deletion was scheduled.
    pub pending_deletion_window_days: Option<u32>,
    /// Imported material expiry (Unix seconds).
    pub valid_to: Option<u64>,
    /// Expiration model of imported material.
    pub expiration_model: Option<ExpirationModel>,
    /// Whether this is a multi-region primary key.
    pub multi_region: bool,
    /// Regions holding a replica of this key.
    pub replica_regions: Vec<String>,
    /// Version of the material used for new ciphertexts (0 = none).
    pub current_material_version: u32,
}

impl KeyMetadata {
    /// Whether the key is usable for cryptographic operations.
    pub fn is_enabled(&self) -> bool {
        self.state == KeyState::Enabled
    }
}

/// Result of an operation that honors the dry-run flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation ran.
    Completed(T),
    /// Every check passed; nothing was generated, wrapped or consumed.
    DryRun,
}

impl<T> Outcome<T> {
    /// Returns the completed value, if the operation ran.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::DryRun => None,
        }
    }

    /// Whether this is a dry-run result.
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun)
    }

    /// Maps the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Completed(value) => Outcome::Completed(f(value)),
            Self::DryRun => Outcome::DryRun,
        }
    }
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
