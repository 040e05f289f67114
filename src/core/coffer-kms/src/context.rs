//! Encryption context: non-secret key/value pairs bound to a ciphertext.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Order-irrelevant string map used as associated data.
///
/// Comparisons are exact and case-sensitive on both keys and values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptionContext(BTreeMap<String, String>);

impl EncryptionContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pair, replacing any previous value for `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a pair.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the context has no pairs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total length of every key and value, in bytes.
    pub fn byte_len(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether every pair of `self` appears in `other` with the same value.
    pub fn is_subset_of(&self, other: &EncryptionContext) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).is_some_and(|ov| ov == v))
    }

    /// Canonical encoding used as associated data.
    ///
    /// `count u32 BE` followed by each pair in key order as
    /// `len u32 BE | key | len u32 BE | value`.
    pub fn to_aad(&self) -> Vec<u8> {
        let body: usize = self.0.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
        let mut out = Vec::with_capacity(4 + body);
        out.extend_from_slice(&(self.0.len() as u32).to_be_bytes());
        for (key, value) in &self.0 {
            out.extend_from_slice(&(key.len() as u32).to_be_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(value.len() as u32).to_be_bytes());
            out.extend_from_slice(value.as_bytes());
        }
        out
    }
}

impl From<BTreeMap<String, String>> for EncryptionContext {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EncryptionContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Restriction on the encryption context a grant may be used with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantConstraints {
    /// Request context must equal this map exactly.
    EncryptionContextEquals(EncryptionContext),
    /// This map must be a subset of the request context.
    EncryptionContextSubset(EncryptionContext),
}

impl GrantConstraints {
    /// Whether a request carrying `context` satisfies the constraint.
    pub fn permits(&self, context: &EncryptionContext) -> bool {
        match self {
            Self::EncryptionContextEquals(required) => required == context,
            Self::EncryptionContextSubset(required) => required.is_subset_of(context),
        }
    }

    /// Whether every context `self` permits is also permitted by `parent`.
    pub fn is_within(&self, parent: &GrantConstraints) -> bool {
        match (self, parent) {
            (Self::EncryptionContextEquals(own), Self::EncryptionContextEquals(required)) => {
                own == required
            },
            (Self::EncryptionContextSubset(_), Self::EncryptionContextEquals(_)) => false,
            (
                Self::EncryptionContextEquals(own) | Self::EncryptionContextSubset(own),
                Self::EncryptionContextSubset(required),
            ) => required.is_subset_of(own),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_order_irrelevant() {
        let a = EncryptionContext::new().with("a", "1").with("b", "2");
        let b = EncryptionContext::new().with("b", "2").with("a", "1");
        assert_eq!(a, b);
        assert_eq!(a.to_aad(), b.to_aad());
    }

    #[test]
    fn test_aad_is_unambiguous() {
        // "ab"="c" and "a"="bc" must not collide
        let left = EncryptionContext::new().with("ab", "c");
        let right = EncryptionContext::new().with("a", "bc");
        assert_ne!(left.to_aad(), right.to_aad());

        assert_eq!(EncryptionContext::new().to_aad(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_equals_constraint() {
        let constraint =
            GrantConstraints::EncryptionContextEquals(EncryptionContext::new().with("dept", "eng"));

        assert!(constraint.permits(&EncryptionContext::new().with("dept", "eng")));
        assert!(!constraint.permits(&EncryptionContext::new().with("dept", "eng").with("x", "y")));
        assert!(!constraint.permits(&EncryptionContext::new()));
        assert!(!constraint.permits(&EncryptionContext::new().with("dept", "Eng")));
    }

    #[test]
    fn test_subset_constraint() {
        let constraint =
            GrantConstraints::EncryptionContextSubset(EncryptionContext::new().with("dept", "eng"));

        assert!(constraint.permits(&EncryptionContext::new().with("dept", "eng")));
        assert!(constraint.permits(&EncryptionContext::new().with("dept", "eng").with("x", "y")));
        assert!(!constraint.permits(&EncryptionContext::new()));
        assert!(!constraint.permits(&EncryptionContext::new().with("Dept", "eng")));

        let empty = GrantConstraints::EncryptionContextSubset(EncryptionContext::new());
        assert!(empty.permits(&EncryptionContext::new().with("any", "thing")));
    }

    #[test]
    fn test_constraint_narrowing() {
        let eng = EncryptionContext::new().with("dept", "eng");
        let eng_ci = EncryptionContext::new().with("dept", "eng").with("env", "ci");
        let subset = |ctx: &EncryptionContext| GrantConstraints::EncryptionContextSubset(ctx.clone());
        let equals = |ctx: &EncryptionContext| GrantConstraints::EncryptionContextEquals(ctx.clone());

        assert!(subset(&eng_ci).is_within(&subset(&eng)));
        assert!(equals(&eng_ci).is_within(&subset(&eng)));
        assert!(equals(&eng).is_within(&equals(&eng)));

        assert!(!subset(&eng).is_within(&subset(&eng_ci)));
        assert!(!equals(&eng_ci).is_within(&equals(&eng)));
        assert!(!subset(&eng).is_within(&equals(&eng)));
        assert!(!subset(&EncryptionContext::new()).is_within(&subset(&eng)));
    }

    #[test]
    fn test_serde_transparent() {
        let ctx = EncryptionContext::new().with("k", "v");
        assert_eq!(serde_json::to_string(&ctx).unwrap(), r#"{"k":"v"}"#);
    }
}
