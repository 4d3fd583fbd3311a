use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_auth::{GroupPermission, GroupRef, PermissionTemplate, ResourcePermissions, Role, UserPermission};
use warden_core::{ResourceId, UserId};

use crate::store::{Session, StoreError};

/// Row-level access to user roles, group roles, templates and the resource
/// freshness stamp.
///
/// Every operation runs inside the caller's session and becomes visible to
/// other sessions only when that session commits.
///
/// ## Implementation Requirements
///
/// - `insert_*` must be idempotent: an existing identical row is left as is.
/// - `delete_*` must be idempotent: a missing row is not an error.
/// - `bulk_replace` leaves the resource with exactly the given permissions.
/// - `Anyone` must be stored in a form no named group can take.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    type Session: Session;

    /// Open a new session. Callers may also bring their own (see the backend's
    /// session type).
    async fn begin(&self) -> Result<Self::Session, StoreError>;

    async fn select_user_roles(
        &self,
        session: &mut Self::Session,
        user: &UserId,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError>;

    async fn select_group_roles(
        &self,
        session: &mut Self::Session,
        group: &GroupRef,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError>;

    /// Number of user-role plus group-role rows on the resource.
    async fn count_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<u64, StoreError>;

    async fn insert_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError>;

    async fn delete_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError>;

    async fn insert_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError>;

    async fn delete_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError>;

    /// Delete every user-role and group-role row of the resource.
    async fn delete_all_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<(), StoreError>;

    /// Replace every user-role and group-role row of the resource with `permissions`.
    async fn bulk_replace(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        permissions: &ResourcePermissions,
    ) -> Result<(), StoreError>;

    /// Template with its grants, or `None` if no template has this key.
    async fn find_template(
        &self,
        session: &mut Self::Session,
        key: &str,
    ) -> Result<Option<PermissionTemplate>, StoreError>;

    /// All templates with their grants, ordered by key.
    async fn list_templates(
        &self,
        session: &mut Self::Session,
    ) -> Result<Vec<PermissionTemplate>, StoreError>;

    /// Set the resource's `authorization_updated_at`. A resource without a row
    /// is left alone.
    async fn stamp_authorization(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn authorization_updated_at(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

#[async_trait]
impl<S> PermissionStore for Arc<S>
where
    S: PermissionStore + ?Sized,
{
    type Session = S::Session;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        (**self).begin().await
    }

    async fn select_user_roles(
        &self,
        session: &mut Self::Session,
        user: &UserId,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError> {
        (**self).select_user_roles(session, user, resource_id).await
    }

    async fn select_group_roles(
        &self,
        session: &mut Self::Session,
        group: &GroupRef,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError> {
        (**self).select_group_roles(session, group, resource_id).await
    }

    async fn count_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<u64, StoreError> {
        (**self).count_roles(session, resource_id).await
    }

    async fn insert_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError> {
        (**self).insert_user_role(session, permission).await
    }

    async fn delete_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError> {
        (**self).delete_user_role(session, permission).await
    }

    async fn insert_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError> {
        (**self).insert_group_role(session, permission).await
    }

    async fn delete_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError> {
        (**self).delete_group_role(session, permission).await
    }

    async fn delete_all_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<(), StoreError> {
        (**self).delete_all_roles(session, resource_id).await
    }

    async fn bulk_replace(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        permissions: &ResourcePermissions,
    ) -> Result<(), StoreError> {
        (**self).bulk_replace(session, resource_id, permissions).await
    }

    async fn find_template(
        &self,
        session: &mut Self::Session,
        key: &str,
    ) -> Result<Option<PermissionTemplate>, StoreError> {
        (**self).find_template(session, key).await
    }

    async fn list_templates(
        &self,
        session: &mut Self::Session,
    ) -> Result<Vec<PermissionTemplate>, StoreError> {
        (**self).list_templates(session).await
    }

    async fn stamp_authorization(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).stamp_authorization(session, resource_id, at).await
    }

    async fn authorization_updated_at(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        (**self).authorization_updated_at(session, resource_id).await
    }
}
