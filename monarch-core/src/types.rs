// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, IdentityError};

/// Maximum length of a derived identity, in characters.
pub const MAX_IDENTITY_LEN: usize = 128;

/// Maximum length of a resource name prefix.
pub const MAX_PREFIX_LEN: usize = 64;

/// Sanitized per-user token that namespaces all shared resources.
/// Contains only ASCII alphanumerics and `_`, at most MAX_IDENTITY_LEN chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Derive an identity from a raw account name.
    ///
    /// The name is truncated to MAX_IDENTITY_LEN characters and every
    /// character that is not an ASCII letter or digit becomes `_`.
    pub fn from_account_name(name: &str) -> Result<Self, IdentityError> {
        if name.is_empty() {
            return Err(IdentityError::EmptyName);
        }

        let sanitized = name
            .chars()
            .take(MAX_IDENTITY_LEN)
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        Ok(Self(sanitized))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UserIdentity> for String {
    fn from(id: UserIdentity) -> Self {
        id.0
    }
}

/// Validated resource name prefix.
/// Must be non-empty, `[A-Za-z0-9_]` only, max MAX_PREFIX_LEN chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePrefix(String);

impl ResourcePrefix {
    /// Create a new ResourcePrefix with validation.
    pub fn new(field: &'static str, prefix: impl Into<String>) -> Result<Self, HardValidationError> {
        let prefix = prefix.into();

        if prefix.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field,
                value: prefix,
                reason: "Prefix cannot be empty".to_string(),
            });
        }

        if prefix.len() > MAX_PREFIX_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field,
                value: prefix.clone(),
                reason: format!(
                    "Prefix too long: {} chars (max {})",
                    prefix.len(),
                    MAX_PREFIX_LEN
                ),
            });
        }

        if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(HardValidationError::InvalidFieldValue {
                field,
                value: prefix,
                reason: "Prefix must contain only ASCII letters, digits, and underscores"
                    .to_string(),
            });
        }

        Ok(Self(prefix))
    }

    /// Create a ResourcePrefix without validation (for built-in defaults).
    pub(crate) fn new_unchecked(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ResourcePrefix {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new("prefix", value)
    }
}

impl From<ResourcePrefix> for String {
    fn from(prefix: ResourcePrefix) -> Self {
        prefix.0
    }
}

/// The two named resources shared by every process of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNames {
    region: String,
    lock: String,
}

impl ResourceNames {
    /// Build `<region_prefix>_<identity>` and `<lock_prefix>_<identity>`.
    pub fn new(
        region_prefix: &ResourcePrefix,
        lock_prefix: &ResourcePrefix,
        identity: &UserIdentity,
    ) -> Self {
        Self {
            region: format!("{}_{}", region_prefix, identity),
            lock: format!("{}_{}", lock_prefix, identity),
        }
    }

    /// Name of the shared region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Name of the cross-process lock.
    pub fn lock(&self) -> &str {
        &self.lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_identity_charset(s: &str) -> bool {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    #[test]
    fn test_identity_keeps_alphanumerics() {
        let id = UserIdentity::from_account_name("alice42").unwrap();
        assert_eq!(id.as_str(), "alice42");
    }

    #[test]
    fn test_identity_replaces_separators() {
        let id = UserIdentity::from_account_name("CORP\\john.doe-admin").unwrap();
        assert_eq!(id.as_str(), "CORP_john_doe_admin");
    }

    #[test]
    fn test_identity_replaces_non_ascii_per_char() {
        let id = UserIdentity::from_account_name("zoë").unwrap();
        assert_eq!(id.as_str(), "zo_");
    }

    #[test]
    fn test_identity_charset_for_many_names() {
        let names = [
            "root",
            "a b c",
            "user@example.com",
            "DOMAIN\\Name With Spaces",
            "名前",
            "__",
            "x;rm -rf /",
        ];
        for name in names {
            let id = UserIdentity::from_account_name(name).unwrap();
            assert!(is_identity_charset(id.as_str()), "bad identity {:?}", id);
            assert_eq!(id.as_str().chars().count(), name.chars().count());
        }
    }

    #[test]
    fn test_identity_is_bounded() {
        let long = "a".repeat(MAX_IDENTITY_LEN * 2);
        let id = UserIdentity::from_account_name(&long).unwrap();
        assert_eq!(id.as_str().len(), MAX_IDENTITY_LEN);
    }

    #[test]
    fn test_identity_empty_rejected() {
        assert!(matches!(
            UserIdentity::from_account_name(""),
            Err(IdentityError::EmptyName)
        ));
    }

    #[test]
    fn test_prefix_validation() {
        assert!(ResourcePrefix::new("region_prefix", "MonarchSharedMem").is_ok());
        assert!(ResourcePrefix::new("region_prefix", "").is_err());
        assert!(ResourcePrefix::new("region_prefix", "has/slash").is_err());
        assert!(ResourcePrefix::new("region_prefix", "has-dash").is_err());
        assert!(ResourcePrefix::new("region_prefix", "p".repeat(MAX_PREFIX_LEN + 1)).is_err());
    }

    #[test]
    fn test_resource_names_are_deterministic() {
        let region = ResourcePrefix::new("region_prefix", "MonarchSharedMem").unwrap();
        let lock = ResourcePrefix::new("lock_prefix", "MonarchSharedMemMutex").unwrap();
        let id = UserIdentity::from_account_name("bob.smith").unwrap();

        let a = ResourceNames::new(&region, &lock, &id);
        let b = ResourceNames::new(&region, &lock, &id);
        assert_eq!(a, b);
        assert_eq!(a.region(), "MonarchSharedMem_bob_smith");
        assert_eq!(a.lock(), "MonarchSharedMemMutex_bob_smith");
    }
}
