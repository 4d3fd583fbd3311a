//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a resource (project, component, ...) whose permissions are managed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(i64);

impl ResourceId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<ResourceId> for i64 {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

impl FromStr for ResourceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = i64::from_str(s.trim())
            .map_err(|e| DomainError::invalid_id(format!("ResourceId: {e}")))?;
        Ok(Self(id))
    }
}

/// Identifier of a user (login).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Name of a concrete user group.
///
/// The "every principal" group is not a `GroupName`; it is modelled separately
/// so it can never be confused with a group that happens to share its label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier without validation.
            ///
            /// Prefer `parse` for values coming from outside the process.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: must not be empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_string_newtype!(UserId, "UserId");
impl_string_newtype!(GroupName, "GroupName");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_parses_and_displays() {
        let id: ResourceId = " 123 ".parse().unwrap();
        assert_eq!(id, ResourceId::new(123));
        assert_eq!(id.to_string(), "123");
        assert!(matches!("abc".parse::<ResourceId>(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn string_ids_reject_blank_input() {
        assert!("   ".parse::<UserId>().is_err());
        assert!("".parse::<GroupName>().is_err());
        assert_eq!("marius".parse::<UserId>().unwrap().as_str(), "marius");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&GroupName::new("devs")).unwrap();
        assert_eq!(json, "\"devs\"");
        let id: ResourceId = serde_json::from_str("42").unwrap();
        assert_eq!(id.get(), 42);
    }
}
