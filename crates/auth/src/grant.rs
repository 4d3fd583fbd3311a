//! Role grants on resources.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use warden_core::{ResourceId, UserId};

use crate::{GroupRef, Role};

/// One user-role row: `user` holds `role` on `resource_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserPermission {
    pub user: UserId,
    pub resource_id: ResourceId,
    pub role: Role,
}

/// One group-role row: members of `group` hold `role` on `resource_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupPermission {
    pub group: GroupRef,
    pub resource_id: ResourceId,
    pub role: Role,
}

/// Who a template grant is for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PrincipalRef {
    User(UserId),
    Group(GroupRef),
}

/// Complete permission set of a single resource.
///
/// Sets give the uniqueness of `(principal, resource, role)` for free, which is
/// what a bulk replace must write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePermissions {
    pub users: BTreeSet<(UserId, Role)>,
    pub groups: BTreeSet<(GroupRef, Role)>,
}

impl ResourcePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, principal: PrincipalRef, role: Role) {
        match principal {
            PrincipalRef::User(user) => {
                self.users.insert((user, role));
            }
            PrincipalRef::Group(group) => {
                self.groups.insert((group, role));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }

    /// Row view of the user grants for `resource_id`.
    pub fn user_permissions(&self, resource_id: ResourceId) -> impl Iterator<Item = UserPermission> + '_ {
        self.users.iter().map(move |(user, role)| UserPermission {
            user: user.clone(),
            resource_id,
            role: role.clone(),
        })
    }

    /// Row view of the group grants for `resource_id`.
    pub fn group_permissions(&self, resource_id: ResourceId) -> impl Iterator<Item = GroupPermission> + '_ {
        self.groups.iter().map(move |(group, role)| GroupPermission {
            group: group.clone(),
            resource_id,
            role: role.clone(),
        })
    }
}

impl FromIterator<(PrincipalRef, Role)> for ResourcePermissions {
    fn from_iter<I: IntoIterator<Item = (PrincipalRef, Role)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (principal, role) in iter {
            out.grant(principal, role);
        }
        out
    }
}
