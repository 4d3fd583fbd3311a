//! Permission templates: named bundles of default grants.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PrincipalRef, ResourcePermissions, Role};

/// A single `(principal, role)` entry of a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateGrant {
    pub principal: PrincipalRef,
    pub role: Role,
}

/// A stored template's key pattern is not a valid regular expression.
#[derive(Debug, Error)]
#[error("invalid key pattern '{pattern}' on template '{template}': {source}")]
pub struct KeyPatternError {
    pub template: String,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Named bundle of user and group role grants, looked up by `key`.
///
/// Templates are read-only from the authorization core's point of view: they
/// are applied to resources, never edited through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTemplate {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Regular expression matched against a full resource key to pick this
    /// template automatically when a resource is provisioned.
    #[serde(default)]
    pub key_pattern: Option<String>,
    #[serde(default)]
    pub grants: Vec<TemplateGrant>,
}

impl PermissionTemplate {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: None,
            key_pattern: None,
            grants: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_key_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.key_pattern = Some(pattern.into());
        self
    }

    pub fn with_grant(mut self, principal: PrincipalRef, role: Role) -> Self {
        self.grants.push(TemplateGrant { principal, role });
        self
    }

    /// The exact permission set a resource has after this template is applied.
    pub fn permissions(&self) -> ResourcePermissions {
        self.grants
            .iter()
            .map(|g| (g.principal.clone(), g.role.clone()))
            .collect()
    }

    /// Whether `resource_key` is entirely matched by this template's key pattern.
    ///
    /// Templates without a pattern never match.
    pub fn matches_key(&self, resource_key: &str) -> Result<bool, KeyPatternError> {
        let Some(pattern) = self.key_pattern.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(false);
        };

        let anchored = format!("^(?:{pattern})$");
        let re = Regex::new(&anchored).map_err(|source| KeyPatternError {
            template: self.key.clone(),
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(re.is_match(resource_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GroupRef;
    use proptest::prelude::*;
    use warden_core::UserId;

    fn default_template() -> PermissionTemplate {
        PermissionTemplate::new("default_20130101_010203", "Default template")
            .with_grant(PrincipalRef::Group(GroupRef::named("sonar-administrators")), Role::ADMIN)
            .with_grant(PrincipalRef::Group(GroupRef::named("sonar-administrators")), Role::ISSUE_ADMIN)
            .with_grant(PrincipalRef::Group(GroupRef::Anyone), Role::USER)
            .with_grant(PrincipalRef::User(UserId::new("marius")), Role::ADMIN)
    }

    #[test]
    fn permissions_expand_grants() {
        let perms = default_template().permissions();
        assert_eq!(perms.users.len(), 1);
        assert_eq!(perms.groups.len(), 3);
        assert!(perms.groups.contains(&(GroupRef::Anyone, Role::USER)));
    }

    #[test]
    fn key_pattern_must_match_whole_key() {
        let template = default_template().with_key_pattern("org\\.sonar\\..*");
        assert!(template.matches_key("org.sonar.core").unwrap());
        assert!(!template.matches_key("com.org.sonar.core").unwrap());
        assert!(!default_template().matches_key("org.sonar.core").unwrap());
    }

    #[test]
    fn invalid_key_pattern_is_reported() {
        let template = default_template().with_key_pattern("(unclosed");
        let err = template.matches_key("anything").unwrap_err();
        assert_eq!(err.template, "default_20130101_010203");
        assert_eq!(err.pattern, "(unclosed");
    }

    #[test]
    fn template_deserializes_with_optional_fields_missing() {
        let template: PermissionTemplate = serde_json::from_value(serde_json::json!({
            "key": "test_template",
            "name": "Test template",
        }))
        .unwrap();
        assert!(template.grants.is_empty());
        assert_eq!(template.key_pattern, None);
    }

    proptest! {
        #[test]
        fn expanded_set_covers_every_grant(
            users in proptest::collection::vec(("[a-z]{1,6}", 0usize..4), 0..12),
            groups in proptest::collection::vec((proptest::option::of("[a-z]{1,6}"), 0usize..4), 0..12),
        ) {
            let roles = [Role::ADMIN, Role::USER, Role::CODE_VIEWER, Role::ISSUE_ADMIN];
            let mut template = PermissionTemplate::new("k", "n");
            for (user, r) in &users {
                template = template.with_grant(PrincipalRef::User(UserId::new(user.clone())), roles[*r].clone());
            }
            for (group, r) in &groups {
                let group = group.clone().map_or(GroupRef::Anyone, GroupRef::named);
                template = template.with_grant(PrincipalRef::Group(group), roles[*r].clone());
            }

            let perms = template.permissions();
            prop_assert!(perms.len() <= template.grants.len());
            for grant in &template.grants {
                match &grant.principal {
                    PrincipalRef::User(u) => prop_assert!(perms.users.contains(&(u.clone(), grant.role.clone()))),
                    PrincipalRef::Group(g) => prop_assert!(perms.groups.contains(&(g.clone(), grant.role.clone()))),
                }
            }
        }
    }
}
