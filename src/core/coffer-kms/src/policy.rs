//! Key policies.
//!
//! A policy is an IAM-style JSON document attached to a key at creation:
//!
//! ```json
//! {
//!   "Version": "2012-10-17",
//!   "Statement": [{
//!     "Sid": "Enable root",
//!     "Effect": "Allow",
//!     "Principal": ["arn:coffer:iam::000000000000:root"],
//!     "Action": "kms:*"
//!   }]
//! }
//! ```
//!
//! Evaluation is default-deny. An explicit `Deny` overrides any `Allow`.

use serde::{Deserialize, Serialize};

use crate::error::KmsError;
use crate::types::Principal;

/// Only supported policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Action prefix every policy action carries.
const ACTION_PREFIX: &str = "kms:";

/// Largest accepted policy document, in bytes.
pub const MAX_POLICY_LEN: usize = 32 * 1024;

/// A JSON value that is either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    /// Single value.
    One(String),
    /// List of values.
    Many(Vec<String>),
}

impl OneOrMany {
    fn values(&self) -> &[String] {
        match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(v) => v,
        }
    }
}

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Grants the listed actions.
    Allow,
    /// Refuses the listed actions, overriding any allow.
    Deny,
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Optional statement id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Allow or deny.
    pub effect: Effect,
    /// Principals the statement applies to; `"*"` matches everyone.
    pub principal: OneOrMany,
    /// Actions, e.g. `kms:Decrypt`, `kms:Generate*` or `kms:*`.
    pub action: OneOrMany,
    /// Resource; keys only ever see `"*"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
}

impl Statement {
    fn matches_principal(&self, principal: &Principal) -> bool {
        self.principal
            .values()
            .iter()
            .any(|p| p == "*" || p == principal.as_str())
    }

    fn matches_action(&self, action: &str) -> bool {
        self.action
            .values()
            .iter()
            .any(|pattern| action_matches(pattern, action))
    }
}

/// Result of evaluating a policy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// A matching allow statement and no matching deny.
    Allow,
    /// A matching deny statement.
    Deny,
    /// No statement matched.
    NotApplicable,
}

/// IAM-style key policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPolicy {
    /// Policy language version.
    pub version: String,
    /// Statements, evaluated together.
    pub statement: Vec<Statement>,
}

impl KeyPolicy {
    /// Default policy: the account root and the creating principal get `kms:*`.
    pub fn default_for(account_id: &str, owner: &Principal) -> Self {
        let root = Principal::account_root(account_id);
        let mut principals = vec![root.as_str().to_string()];
        if owner != &root {
            principals.push(owner.as_str().to_string());
        }

        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                sid: Some("Enable account and creator permissions".to_string()),
                effect: Effect::Allow,
                principal: OneOrMany::Many(principals),
                action: OneOrMany::One("kms:*".to_string()),
                resource: Some(OneOrMany::One("*".to_string())),
            }],
        }
    }

    /// Parses and validates a policy document.
    pub fn parse(document: &str) -> Result<Self, KmsError> {
        if document.len() > MAX_POLICY_LEN {
            return Err(KmsError::MalformedPolicy(format!(
                "policy exceeds {MAX_POLICY_LEN} bytes"
            )));
        }

        let policy: KeyPolicy = serde_json::from_str(document)
            .map_err(|e| KmsError::MalformedPolicy(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), KmsError> {
        if self.version != POLICY_VERSION {
            return Err(KmsError::MalformedPolicy(format!(
                "unsupported policy version: {}",
                self.version
            )));
        }
        if self.statement.is_empty() {
            return Err(KmsError::MalformedPolicy("policy has no statements".into()));
        }

        for (i, statement) in self.statement.iter().enumerate() {
            if statement.principal.values().iter().all(|p| p.is_empty()) {
                return Err(KmsError::MalformedPolicy(format!(
                    "statement {i} has no principal"
                )));
            }

            let actions = statement.action.values();
            if actions.is_empty() {
                return Err(KmsError::MalformedPolicy(format!("statement {i} has no action")));
            }
            for action in actions {
                let lowered = action.to_ascii_lowercase();
                if !lowered.starts_with(ACTION_PREFIX) || lowered.len() == ACTION_PREFIX.len() {
                    return Err(KmsError::MalformedPolicy(format!(
                        "statement {i} has an invalid action: {action}"
                    )));
                }
                if action.strip_suffix('*').unwrap_or(action).contains('*') {
                    return Err(KmsError::MalformedPolicy(format!(
                        "statement {i}: wildcards are only allowed at the end of an action"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Evaluates `action` (e.g. `kms:Decrypt`) for `principal`.
    pub fn evaluate(&self, principal: &Principal, action: &str) -> PolicyDecision {
        let mut decision = PolicyDecision::NotApplicable;

        for statement in &self.statement {
            if !statement.matches_principal(principal) || !statement.matches_action(action) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return PolicyDecision::Deny,
                Effect::Allow => decision = PolicyDecision::Allow,
            }
        }

        decision
    }

    /// Whether the policy allows `action` for `principal`.
    pub fn allows(&self, principal: &Principal, action: &str) -> bool {
        self.evaluate(principal, action) == PolicyDecision::Allow
    }

    /// Serialized JSON document.
    pub fn to_json(&self) -> Result<String, KmsError> {
        serde_json::to_string(self).map_err(|e| KmsError::MalformedPolicy(e.to_string()))
    }
}

/// Case-insensitive match with an optional trailing `*` wildcard.
fn action_matches(pattern: &str, action: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let action = action.to_ascii_lowercase();

    match pattern.strip_suffix('*') {
        Some(prefix) => action.starts_with(prefix),
        None => pattern == action,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn alice() -> Principal {
        Principal::new("arn:coffer:iam::111122223333:user/alice")
    }

    fn bob() -> Principal {
        Principal::new("arn:coffer:iam::111122223333:user/bob")
    }

    #[test]
    fn test_default_policy() {
        let policy = KeyPolicy::default_for("111122223333", &alice());

        assert!(policy.allows(&alice(), "kms:Decrypt"));
        assert!(policy.allows(&alice(), "kms:PutKeyPolicy"));
        assert!(policy.allows(&Principal::account_root("111122223333"), "kms:RevokeGrant"));
        assert!(!policy.allows(&bob(), "kms:Encrypt"));
    }

    #[test]
    fn test_default_policy_for_root_lists_it_once() {
        let root = Principal::account_root("111122223333");
        let policy = KeyPolicy::default_for("111122223333", &root);

        assert_eq!(policy.statement[0].principal.values().len(), 1);
    }

    #[test]
    fn test_parse_and_wildcards() {
        let doc = r#"{
            "Version": "2012-10-17",
            "Statement": [
                {"Effect": "Allow", "Principal": "*", "Action": "kms:Generate*"},
                {"Effect": "Allow", "Principal": ["arn:coffer:iam::111122223333:user/alice"], "Action": ["kms:Decrypt", "kms:PutKeyPolicy"]}
            ]
        }"#;
        let policy = KeyPolicy::parse(doc).unwrap();

        assert!(policy.allows(&bob(), "kms:GenerateDataKey"));
        assert!(policy.allows(&bob(), "kms:GenerateMac"));
        assert!(!policy.allows(&bob(), "kms:Decrypt"));
        assert!(policy.allows(&alice(), "KMS:decrypt"));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let doc = r#"{
            "Version": "2012-10-17",
            "Statement": [
                {"Effect": "Allow", "Principal": "*", "Action": "kms:*"},
                {"Sid": "NoDecrypt", "Effect": "Deny", "Principal": "arn:coffer:iam::111122223333:user/bob", "Action": "kms:Decrypt"}
            ]
        }"#;
        let policy = KeyPolicy::parse(doc).unwrap();

        assert_eq!(policy.evaluate(&bob(), "kms:Decrypt"), PolicyDecision::Deny);
        assert_eq!(policy.evaluate(&bob(), "kms:Encrypt"), PolicyDecision::Allow);
        assert_eq!(policy.evaluate(&alice(), "kms:Decrypt"), PolicyDecision::Allow);
    }

    #[test]
    fn test_principal_matching_is_exact() {
        let doc = r#"{
            "Version": "2012-10-17",
            "Statement": [{"Effect": "Allow", "Principal": "arn:coffer:iam::111122223333:user/alice", "Action": "kms:*"}]
        }"#;
        let policy = KeyPolicy::parse(doc).unwrap();

        let lookalike = Principal::new("arn:coffer:iam::111122223333:user/alice2");
        assert_eq!(policy.evaluate(&lookalike, "kms:Encrypt"), PolicyDecision::NotApplicable);
    }

    #[test]
    fn test_malformed_documents() {
        let cases = [
            "not json",
            r#"{"Version": "2008-10-17", "Statement": [{"Effect": "Allow", "Principal": "*", "Action": "kms:*"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": []}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Principal": "*", "Action": "s3:GetObject"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Principal": "*", "Action": "kms:*Key"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Maybe", "Principal": "*", "Action": "kms:*"}]}"#,
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Principal": [], "Action": "kms:*"}]}"#,
        ];

        for doc in cases {
            assert!(
                matches!(KeyPolicy::parse(doc), Err(KmsError::MalformedPolicy(_))),
                "accepted: {doc}"
            );
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let policy = KeyPolicy::default_for("111122223333", &alice());
        let parsed = KeyPolicy::parse(&policy.to_json().unwrap()).unwrap();
        assert_eq!(parsed, policy);
    }
}
