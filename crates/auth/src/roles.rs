use std::borrow::Cow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

/// Role identifier used for RBAC on resources.
///
/// Roles are opaque strings: the platform may define roles beyond the
/// well-known ones below without touching this crate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Administer the resource (settings, permissions).
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    /// Browse the resource.
    pub const USER: Role = Role(Cow::Borrowed("user"));
    /// See the resource's source code.
    pub const CODE_VIEWER: Role = Role(Cow::Borrowed("codeviewer"));
    /// Administer issues on the resource.
    pub const ISSUE_ADMIN: Role = Role(Cow::Borrowed("issueadmin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl FromStr for Role {
    type Err = DomainError;

    /// Parse a role coming from outside the process. Role names are single
    /// tokens: blank names and embedded whitespace are rejected.
    fn from_str(s: &str) -> DomainResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("role must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!("role '{trimmed}' contains whitespace")));
        }
        Ok(Self(Cow::Owned(trimmed.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_roles_equal_their_dynamic_form() {
        assert_eq!(Role::ADMIN, Role::new("admin"));
        assert_eq!(Role::CODE_VIEWER, Role::from("codeviewer".to_string()));
        assert_ne!(Role::USER, Role::ISSUE_ADMIN);
    }

    #[test]
    fn platform_defined_roles_are_accepted() {
        let role = Role::new("scan");
        assert_eq!(role.as_str(), "scan");
        assert_eq!(serde_json::to_string(&role).unwrap(), "\"scan\"");
    }

    #[test]
    fn parse_rejects_blank_and_spaced_roles() {
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::ADMIN);
        assert!(matches!("".parse::<Role>(), Err(DomainError::Validation(_))));
        assert!("code viewer".parse::<Role>().is_err());
    }
}
