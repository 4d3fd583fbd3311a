//! Postgres-backed authorization tables.
//!
//! All statements run on the caller's [`PgSession`], so they commit or roll back
//! together with whatever else the caller does in that transaction.
//!
//! `bulk_replace` and `delete_all_roles` take a transaction-scoped advisory
//! lock keyed on the resource id, so concurrent replaces of one resource run
//! one after the other and the last committed one wins outright.
//!
//! `GroupRef::Anyone` is stored as `group_name IS NULL`. Lookups compare with
//! `IS NOT DISTINCT FROM` so the same statement serves named groups and Anyone.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use warden_auth::{
    GroupPermission, GroupRef, PermissionTemplate, PrincipalRef, ResourcePermissions, Role,
    TemplateGrant, UserPermission,
};
use warden_core::{GroupName, ResourceId, UserId};

use crate::store::postgres::map_sqlx_error;
use crate::store::{PgSession, StoreError};

use super::r#trait::PermissionStore;

/// Postgres-backed permission store.
#[derive(Debug, Clone)]
pub struct PostgresPermissionStore {
    pool: Arc<PgPool>,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn group_param(group: &GroupRef) -> Option<&str> {
    group.name().map(GroupName::as_str)
}

fn roles_from_rows(rows: Vec<PgRow>, operation: &str) -> Result<BTreeSet<Role>, StoreError> {
    rows.into_iter()
        .map(|row| {
            row.try_get::<String, _>("role")
                .map(Role::from)
                .map_err(|e| map_sqlx_error(operation, e))
        })
        .collect()
}

fn template_from_row(row: &PgRow) -> Result<(i64, PermissionTemplate), StoreError> {
    let op = "load_template";
    let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error(op, e))?;
    Ok((
        id,
        PermissionTemplate {
            key: row.try_get("kee").map_err(|e| map_sqlx_error(op, e))?,
            name: row.try_get("name").map_err(|e| map_sqlx_error(op, e))?,
            description: row.try_get("description").map_err(|e| map_sqlx_error(op, e))?,
            key_pattern: row.try_get("key_pattern").map_err(|e| map_sqlx_error(op, e))?,
            grants: Vec::new(),
        },
    ))
}

/// Grants of the given templates keyed by template id. `None` loads all.
async fn load_grants(
    session: &mut PgSession,
    template_id: Option<i64>,
) -> Result<HashMap<i64, Vec<TemplateGrant>>, StoreError> {
    let op = "load_template_grants";
    let mut grants: HashMap<i64, Vec<TemplateGrant>> = HashMap::new();

    let user_rows = sqlx::query(
        r#"
        SELECT template_id, user_id, permission
        FROM perm_templates_users
        WHERE $1::BIGINT IS NULL OR template_id = $1
        ORDER BY template_id, user_id, permission
        "#,
    )
    .bind(template_id)
    .fetch_all(session.connection())
    .await
    .map_err(|e| map_sqlx_error(op, e))?;

    for row in user_rows {
        let id: i64 = row.try_get("template_id").map_err(|e| map_sqlx_error(op, e))?;
        let user: String = row.try_get("user_id").map_err(|e| map_sqlx_error(op, e))?;
        let role: String = row.try_get("permission").map_err(|e| map_sqlx_error(op, e))?;
        grants.entry(id).or_default().push(TemplateGrant {
            principal: PrincipalRef::User(UserId::new(user)),
            role: Role::from(role),
        });
    }

    let group_rows = sqlx::query(
        r#"
        SELECT template_id, group_name, permission
        FROM perm_templates_groups
        WHERE $1::BIGINT IS NULL OR template_id = $1
        ORDER BY template_id, group_name NULLS FIRST, permission
        "#,
    )
    .bind(template_id)
    .fetch_all(session.connection())
    .await
    .map_err(|e| map_sqlx_error(op, e))?;

    for row in group_rows {
        let id: i64 = row.try_get("template_id").map_err(|e| map_sqlx_error(op, e))?;
        let group: Option<String> = row.try_get("group_name").map_err(|e| map_sqlx_error(op, e))?;
        let role: String = row.try_get("permission").map_err(|e| map_sqlx_error(op, e))?;
        grants.entry(id).or_default().push(TemplateGrant {
            principal: PrincipalRef::Group(GroupRef::from(group.map(GroupName::new))),
            role: Role::from(role),
        });
    }

    Ok(grants)
}

async fn insert_user_row(session: &mut PgSession, permission: &UserPermission) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO user_roles (user_id, resource_id, role)
        VALUES ($1, $2, $3)
        ON CONFLICT ON CONSTRAINT user_roles_unique DO NOTHING
        "#,
    )
    .bind(permission.user.as_str())
    .bind(permission.resource_id.get())
    .bind(permission.role.as_str())
    .execute(session.connection())
    .await
    .map_err(|e| map_sqlx_error("insert_user_role", e))?;
    Ok(())
}

async fn insert_group_row(session: &mut PgSession, permission: &GroupPermission) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO group_roles (group_name, resource_id, role)
        VALUES ($1, $2, $3)
        ON CONFLICT ON CONSTRAINT group_roles_unique DO NOTHING
        "#,
    )
    .bind(group_param(&permission.group))
    .bind(permission.resource_id.get())
    .bind(permission.role.as_str())
    .execute(session.connection())
    .await
    .map_err(|e| map_sqlx_error("insert_group_role", e))?;
    Ok(())
}

/// Block other writers replacing or clearing the same resource until this
/// transaction ends. Works whether or not the resource has a `resources` row.
async fn lock_resource(session: &mut PgSession, resource_id: ResourceId) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(resource_id.get())
        .execute(session.connection())
        .await
        .map_err(|e| map_sqlx_error("lock_resource", e))?;
    Ok(())
}

/// Delete every role row of the resource. Takes the resource lock first so a
/// concurrent writer's uncommitted rows cannot survive the delete.
async fn delete_resource_rows(session: &mut PgSession, resource_id: ResourceId) -> Result<(), StoreError> {
    lock_resource(session, resource_id).await?;
    sqlx::query("DELETE FROM user_roles WHERE resource_id = $1")
        .bind(resource_id.get())
        .execute(session.connection())
        .await
        .map_err(|e| map_sqlx_error("delete_user_roles", e))?;
    sqlx::query("DELETE FROM group_roles WHERE resource_id = $1")
        .bind(resource_id.get())
        .execute(session.connection())
        .await
        .map_err(|e| map_sqlx_error("delete_group_roles", e))?;
    Ok(())
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    type Session = PgSession;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        PgSession::begin(&self.pool).await
    }

    async fn select_user_roles(
        &self,
        session: &mut Self::Session,
        user: &UserId,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT role FROM user_roles
            WHERE user_id = $1 AND resource_id = $2
            "#,
        )
        .bind(user.as_str())
        .bind(resource_id.get())
        .fetch_all(session.connection())
        .await
        .map_err(|e| map_sqlx_error("select_user_roles", e))?;

        roles_from_rows(rows, "select_user_roles")
    }

    async fn select_group_roles(
        &self,
        session: &mut Self::Session,
        group: &GroupRef,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT role FROM group_roles
            WHERE group_name IS NOT DISTINCT FROM $1 AND resource_id = $2
            "#,
        )
        .bind(group_param(group))
        .bind(resource_id.get())
        .fetch_all(session.connection())
        .await
        .map_err(|e| map_sqlx_error("select_group_roles", e))?;

        roles_from_rows(rows, "select_group_roles")
    }

    async fn count_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM user_roles WHERE resource_id = $1)
                 + (SELECT COUNT(*) FROM group_roles WHERE resource_id = $1)
            "#,
        )
        .bind(resource_id.get())
        .fetch_one(session.connection())
        .await
        .map_err(|e| map_sqlx_error("count_roles", e))?;

        u64::try_from(total).map_err(|_| StoreError::Decode(format!("negative role count {total}")))
    }

    #[instrument(skip(self, session), fields(resource_id = %permission.resource_id), err)]
    async fn insert_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError> {
        insert_user_row(session, permission).await
    }

    #[instrument(skip(self, session), fields(resource_id = %permission.resource_id), err)]
    async fn delete_user_role(
        &self,
        session: &mut Self::Session,
        permission: &UserPermission,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM user_roles
            WHERE user_id = $1 AND resource_id = $2 AND role = $3
            "#,
        )
        .bind(permission.user.as_str())
        .bind(permission.resource_id.get())
        .bind(permission.role.as_str())
        .execute(session.connection())
        .await
        .map_err(|e| map_sqlx_error("delete_user_role", e))?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(resource_id = %permission.resource_id), err)]
    async fn insert_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError> {
        insert_group_row(session, permission).await
    }

    #[instrument(skip(self, session), fields(resource_id = %permission.resource_id), err)]
    async fn delete_group_role(
        &self,
        session: &mut Self::Session,
        permission: &GroupPermission,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM group_roles
            WHERE group_name IS NOT DISTINCT FROM $1 AND resource_id = $2 AND role = $3
            "#,
        )
        .bind(group_param(&permission.group))
        .bind(permission.resource_id.get())
        .bind(permission.role.as_str())
        .execute(session.connection())
        .await
        .map_err(|e| map_sqlx_error("delete_group_role", e))?;
        Ok(())
    }

    #[instrument(skip(self, session), err)]
    async fn delete_all_roles(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<(), StoreError> {
        delete_resource_rows(session, resource_id).await
    }

    #[instrument(skip(self, session, permissions), fields(rows = permissions.len()), err)]
    async fn bulk_replace(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        permissions: &ResourcePermissions,
    ) -> Result<(), StoreError> {
        delete_resource_rows(session, resource_id).await?;
        for permission in permissions.user_permissions(resource_id) {
            insert_user_row(session, &permission).await?;
        }
        for permission in permissions.group_permissions(resource_id) {
            insert_group_row(session, &permission).await?;
        }
        Ok(())
    }

    async fn find_template(
        &self,
        session: &mut Self::Session,
        key: &str,
    ) -> Result<Option<PermissionTemplate>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, kee, name, description, key_pattern
            FROM permission_templates
            WHERE kee = $1
            "#,
        )
        .bind(key)
        .fetch_optional(session.connection())
        .await
        .map_err(|e| map_sqlx_error("find_template", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let (id, mut template) = template_from_row(&row)?;
        let mut grants = load_grants(session, Some(id)).await?;
        template.grants = grants.remove(&id).unwrap_or_default();
        Ok(Some(template))
    }

    async fn list_templates(
        &self,
        session: &mut Self::Session,
    ) -> Result<Vec<PermissionTemplate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, kee, name, description, key_pattern
            FROM permission_templates
            ORDER BY kee
            "#,
        )
        .fetch_all(session.connection())
        .await
        .map_err(|e| map_sqlx_error("list_templates", e))?;

        let mut grants = load_grants(session, None).await?;
        rows.iter()
            .map(|row| {
                let (id, mut template) = template_from_row(row)?;
                template.grants = grants.remove(&id).unwrap_or_default();
                Ok(template)
            })
            .collect()
    }

    async fn stamp_authorization(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE resources SET authorization_updated_at = $2 WHERE id = $1")
            .bind(resource_id.get())
            .bind(at)
            .execute(session.connection())
            .await
            .map_err(|e| map_sqlx_error("stamp_authorization", e))?;
        Ok(())
    }

    async fn authorization_updated_at(
        &self,
        session: &mut Self::Session,
        resource_id: ResourceId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let stamp: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT authorization_updated_at FROM resources WHERE id = $1",
        )
        .bind(resource_id.get())
        .fetch_optional(session.connection())
        .await
        .map_err(|e| map_sqlx_error("authorization_updated_at", e))?;

        Ok(stamp.flatten())
    }
}
