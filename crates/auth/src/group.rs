use serde::{Deserialize, Serialize};

use warden_core::GroupName;

/// Group side of a group-role grant.
///
/// `Anyone` stands for every principal, authenticated or anonymous. It is a
/// value of its own rather than a reserved group name, so no real group can
/// collide with it. Serialized as `null`, matching its storage form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<GroupName>", into = "Option<GroupName>")]
pub enum GroupRef {
    Named(GroupName),
    Anyone,
}

impl GroupRef {
    /// Label shown for `Anyone` in listings and accepted by [`GroupRef::from_label`].
    pub const ANYONE_LABEL: &'static str = "Anyone";

    pub fn named(name: impl Into<GroupName>) -> Self {
        Self::Named(name.into())
    }

    /// Convert a label received at an outer boundary (UI, API, settings).
    ///
    /// The label `Anyone` is reserved at those boundaries and maps to
    /// [`GroupRef::Anyone`]; everything else is a named group.
    pub fn from_label(label: &str) -> Self {
        if label == Self::ANYONE_LABEL {
            Self::Anyone
        } else {
            Self::Named(GroupName::new(label))
        }
    }

    pub fn name(&self) -> Option<&GroupName> {
        match self {
            Self::Named(name) => Some(name),
            Self::Anyone => None,
        }
    }

    pub fn is_anyone(&self) -> bool {
        matches!(self, Self::Anyone)
    }
}

impl core::fmt::Display for GroupRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Named(name) => core::fmt::Display::fmt(name, f),
            Self::Anyone => f.write_str(Self::ANYONE_LABEL),
        }
    }
}

impl From<GroupName> for GroupRef {
    fn from(value: GroupName) -> Self {
        Self::Named(value)
    }
}

impl From<Option<GroupName>> for GroupRef {
    fn from(value: Option<GroupName>) -> Self {
        value.map_or(Self::Anyone, Self::Named)
    }
}

impl From<GroupRef> for Option<GroupName> {
    fn from(value: GroupRef) -> Self {
        match value {
            GroupRef::Named(name) => Some(name),
            GroupRef::Anyone => None,
        }
    }
}
