use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use warden_auth::{GroupPermission, GroupRef, PermissionTemplate, ResourcePermissions, Role, UserPermission};
use warden_core::{ResourceId, UserId};

use crate::store::{Session, StoreError};

use super::r#trait::PermissionStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub resources: BTreeMap<ResourceId, Option<DateTime<Utc>>>,
    pub user_roles: BTreeSet<UserPermission>,
    pub group_roles: BTreeSet<GroupPermission>,
    pub templates: BTreeMap<String, PermissionTemplate>,
}

/// One row of the external `resources` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRow {
    pub id: ResourceId,
    #[serde(default)]
    pub authorization_updated_at: Option<DateTime<Utc>>,
}

/// Seed data for [`InMemoryPermissionStore::with_dataset`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionDataset {
    #[serde(default)]
    pub resources: Vec<ResourceRow>,
    #[serde(default)]
    pub user_roles: Vec<UserPermission>,
    #[serde(default)]
    pub group_roles: Vec<GroupPermission>,
    #[serde(default)]
    pub templates: Vec<PermissionTemplate>,
}

/// In-memory authorization tables.
///
/// Intended for tests/dev. A session owns the table lock from `begin` until it
/// commits or is dropped, so sessions run one at a time (serializable). Writes
/// go to a private copy that replaces the tables on commit.
///
/// Do not hold two sessions of the same store in one task: the second `begin`
/// waits for the first to finish.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPermissionStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(dataset: PermissionDataset) -> Self {
        let tables = Tables {
            resources: dataset
                .resources
                .into_iter()
                .map(|r| (r.id, r.authorization_updated_at))
                .collect(),
            user_roles: dataset.user_roles.into_iter().collect(),
            group_roles: dataset.group_roles.into_iter().collect(),
            templates: dataset
                .templates
                .into_iter()
                .map(|t| (t.key.clone(), t))
                .collect(),
        };
        Self {
            tables: Arc::new(Mutex::new(tables)),
        }
    }

    /// Copy of the committed tables.
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

/// Exclusive session over an [`InMemoryPermissionStore`].
pub struct InMemorySession {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySession").finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn commit(self) -> Result<(), StoreError> {
        let Self { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn user_roles_of(tables: &Tables, user: &UserId, resource_id: ResourceId) -> BTreeSet<Role> {
    tables
        .user_roles
        .iter()
        .filter(|p| p.resource_id == resource_id && &p.user == user)
        .map(|p| p.role.clone())
        .collect()
}

fn group_roles_of(tables: &Tables, group: &GroupRef, resource_id: ResourceId) -> BTreeSet<Role> {
    tables
        .group_roles
        .iter()
        .filter(|p| p.resource_id == resource_id && &p.group == group)
        .map(|p| p.role.clone())
        .collect()
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    type Session = InMemorySession;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemorySession { guard, working })
    }

    async fn select_user_roles(
        &self,
        session: &mut Self::Session,
        user: &UserId,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError> {
        Ok(user_roles_of(&session.working, user, resource_id))
    }

    async fn select_group_roles(
        &self,
        session: &mut Self::Session,
        group: &GroupRef,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError> {
        Ok(group_roles_of(&session.working, group, resource_id))
    }

    async fn count_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<u64, StoreError> {
        let tables = &session.working;
        let users = tables
            .user_roles
            .iter()
            .filter(|p| p.resource_id == resource_id)
            .count();
        let groups = tables
            .group_roles
            .iter()
            .filter(|p| p.resource_id == resource_id)
            .count();
        Ok((users + groups) as u64)
    }

    async fn insert_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError> {
        session.working.user_roles.insert(permission.clone());
        Ok(())
    }

    async fn delete_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError> {
        session.working.user_roles.remove(permission);
        Ok(())
    }

    async fn insert_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError> {
        session.working.group_roles.insert(permission.clone());
        Ok(())
    }

    async fn delete_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError> {
        session.working.group_roles.remove(permission);
        Ok(())
    }

    async fn delete_all_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<(), StoreError> {
        let tables = &mut session.working;
        tables.user_roles.retain(|p| p.resource_id != resource_id);
        tables.group_roles.retain(|p| p.resource_id != resource_id);
        Ok(())
    }

    async fn bulk_replace(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        permissions: &ResourcePermissions,
    ) -> Result<(), StoreError> {
        let tables = &mut session.working;
        tables.user_roles.retain(|p| p.resource_id != resource_id);
        tables.group_roles.retain(|p| p.resource_id != resource_id);
        tables
            .user_roles
            .extend(permissions.user_permissions(resource_id));
        tables
            .group_roles
            .extend(permissions.group_permissions(resource_id));
        Ok(())
    }

    async fn find_template(
        &self,
        session: &mut Self::Session,
        key: &str,
    ) -> Result<Option<PermissionTemplate>, StoreError> {
        Ok(session.working.templates.get(key).cloned())
    }

    async fn list_templates(
        &self,
        session: &mut Self::Session,
    ) -> Result<Vec<PermissionTemplate>, StoreError> {
        Ok(session.working.templates.values().cloned().collect())
    }

    async fn stamp_authorization(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(stamp) = session.working.resources.get_mut(&resource_id) {
            *stamp = Some(at);
        }
        Ok(())
    }

    async fn authorization_updated_at(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(session.working.resources.get(&resource_id).copied().flatten())
    }
}
