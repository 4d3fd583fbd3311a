//! Read and write access to resource authorization.
//!
//! Every operation takes the caller's session and never commits it, so
//! authorization changes land atomically with the caller's other writes. Each
//! write also stamps the resource's `authorization_updated_at` inside the same
//! session, which lets caches and search indexes detect stale authorization
//! data.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use warden_auth::{GroupPermission, GroupRef, KeyPatternError, PermissionTemplate, Role, UserPermission};
use warden_core::{Clock, ResourceId, SystemClock, UserId};

use crate::config::PermissionSettings;
use crate::store::StoreError;

use super::r#trait::PermissionStore;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("permission template '{0}' not found")]
    TemplateNotFound(String),

    #[error("resource key '{resource_key}' matches several permission templates: {}", .keys.join(", "))]
    AmbiguousTemplates { resource_key: String, keys: Vec<String> },

    #[error("no permission template applies to resource key '{resource_key}' (qualifier '{qualifier}')")]
    NoApplicableTemplate { resource_key: String, qualifier: String },

    #[error(transparent)]
    InvalidKeyPattern(#[from] KeyPatternError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Entry point for reading and changing who may do what on a resource.
#[derive(Debug, Clone)]
pub struct PermissionFacade<S, C = SystemClock> {
    store: S,
    clock: C,
    settings: PermissionSettings,
}

impl<S> PermissionFacade<S>
where
    S: PermissionStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: SystemClock,
            settings: PermissionSettings::default(),
        }
    }
}

impl<S, C> PermissionFacade<S, C>
where
    S: PermissionStore,
    C: Clock,
{
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            settings: PermissionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PermissionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &PermissionSettings {
        &self.settings
    }

    /// Open a session on the underlying store.
    pub async fn begin(&self) -> Result<S::Session, PermissionError> {
        Ok(self.store.begin().await?)
    }

    // ---- reads ----

    #[instrument(skip(self, session), fields(%resource_id, %user), err)]
    pub async fn select_user_permissions(
        &self,
        session: &mut S::Session,
        user: &UserId,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, PermissionError> {
        Ok(self.store.select_user_roles(session, user, resource_id).await?)
    }

    /// Roles held by `group` on the resource. `GroupRef::Anyone` returns only
    /// the Anyone grants, never those of a named group.
    #[instrument(skip(self, session), fields(%resource_id, %group), err)]
    pub async fn select_group_permissions(
        &self,
        session: &mut S::Session,
        group: &GroupRef,
        resource_id: ResourceId,
    ) -> Result<BTreeSet<Role>, PermissionError> {
        Ok(self.store.select_group_roles(session, group, resource_id).await?)
    }

    /// Number of user and group grants on the resource.
    #[instrument(skip(self, session), fields(%resource_id), err)]
    pub async fn count_component_permissions(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
    ) -> Result<u64, PermissionError> {
        Ok(self.store.count_roles(session, resource_id).await?)
    }

    #[instrument(skip(self, session), err)]
    pub async fn get_permission_template_with_permissions(
        &self,
        session: &mut S::Session,
        template_key: &str,
    ) -> Result<PermissionTemplate, PermissionError> {
        self.store
            .find_template(session, template_key)
            .await?
            .ok_or_else(|| PermissionError::TemplateNotFound(template_key.to_string()))
    }

    #[instrument(skip(self, session), fields(%resource_id), err)]
    pub async fn authorization_updated_at(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
    ) -> Result<Option<DateTime<Utc>>, PermissionError> {
        Ok(self.store.authorization_updated_at(session, resource_id).await?)
    }

    // ---- writes ----

    #[instrument(skip(self, session), fields(%resource_id, %user, %role), err)]
    pub async fn insert_user_permission(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
        user: &UserId,
        role: &Role,
    ) -> Result<(), PermissionError> {
        let permission = UserPermission {
            user: user.clone(),
            resource_id,
            role: role.clone(),
        };
        self.store.insert_user_role(session, &permission).await?;
        self.stamp(session, resource_id).await
    }

    #[instrument(skip(self, session), fields(%resource_id, %user, %role), err)]
    pub async fn delete_user_permission(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
        user: &UserId,
        role: &Role,
    ) -> Result<(), PermissionError> {
        let permission = UserPermission {
            user: user.clone(),
            resource_id,
            role: role.clone(),
        };
        self.store.delete_user_role(session, &permission).await?;
        self.stamp(session, resource_id).await
    }

    #[instrument(skip(self, session), fields(%resource_id, %group, %role), err)]
    pub async fn insert_group_permission(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
        group: &GroupRef,
        role: &Role,
    ) -> Result<(), PermissionError> {
        let permission = GroupPermission {
            group: group.clone(),
            resource_id,
            role: role.clone(),
        };
        self.store.insert_group_role(session, &permission).await?;
        self.stamp(session, resource_id).await
    }

    #[instrument(skip(self, session), fields(%resource_id, %group, %role), err)]
    pub async fn delete_group_permission(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
        group: &GroupRef,
        role: &Role,
    ) -> Result<(), PermissionError> {
        let permission = GroupPermission {
            group: group.clone(),
            resource_id,
            role: role.clone(),
        };
        self.store.delete_group_role(session, &permission).await?;
        self.stamp(session, resource_id).await
    }

    /// Replace every grant on the resource with exactly the template's grants.
    ///
    /// An unknown key fails with `TemplateNotFound` before anything is written.
    #[instrument(skip(self, session), fields(%resource_id), err)]
    pub async fn apply_permission_template(
        &self,
        session: &mut S::Session,
        template_key: &str,
        resource_id: ResourceId,
    ) -> Result<(), PermissionError> {
        let template = self
            .get_permission_template_with_permissions(session, template_key)
            .await?;
        let permissions = template.permissions();

        self.store
            .bulk_replace(session, resource_id, &permissions)
            .await?;
        self.stamp(session, resource_id).await?;

        tracing::info!(
            template = %template.key,
            grants = permissions.len(),
            "applied permission template"
        );
        Ok(())
    }

    /// Delete every user and group grant on the resource.
    #[instrument(skip(self, session), fields(%resource_id), err)]
    pub async fn remove_all_permissions(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
    ) -> Result<(), PermissionError> {
        self.store.delete_all_roles(session, resource_id).await?;
        self.stamp(session, resource_id).await
    }

    // ---- default templates ----

    /// Key of the template a new resource should receive.
    ///
    /// A template whose key pattern matches the whole `resource_key` wins;
    /// several matching templates are an error. Without a match, the configured
    /// default for `qualifier` applies, then the global default.
    #[instrument(skip(self, session), err)]
    pub async fn applicable_template_key(
        &self,
        session: &mut S::Session,
        resource_key: &str,
        qualifier: &str,
    ) -> Result<String, PermissionError> {
        let mut matching = Vec::new();
        for template in self.store.list_templates(session).await? {
            if template.matches_key(resource_key)? {
                matching.push(template.key);
            }
        }

        match matching.len() {
            1 => Ok(matching.remove(0)),
            0 => self
                .settings
                .template_for(qualifier)
                .map(str::to_string)
                .ok_or_else(|| PermissionError::NoApplicableTemplate {
                    resource_key: resource_key.to_string(),
                    qualifier: qualifier.to_string(),
                }),
            _ => Err(PermissionError::AmbiguousTemplates {
                resource_key: resource_key.to_string(),
                keys: matching,
            }),
        }
    }

    /// Apply the template selected by [`Self::applicable_template_key`].
    #[instrument(skip(self, session), fields(%resource_id), err)]
    pub async fn grant_default_roles(
        &self,
        session: &mut S::Session,
        resource_id: ResourceId,
        resource_key: &str,
        qualifier: &str,
    ) -> Result<(), PermissionError> {
        let key = self
            .applicable_template_key(session, resource_key, qualifier)
            .await?;
        self.apply_permission_template(session, &key, resource_id)
            .await
    }

    async fn stamp(&self, session: &mut S::Session, resource_id: ResourceId) -> Result<(), PermissionError> {
        self.store
            .stamp_authorization(session, resource_id, self.clock.now())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::permissions::{InMemoryPermissionStore, PermissionDataset};
    use crate::store::Session;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use warden_core::ManualClock;

    type Facade = PermissionFacade<InMemoryPermissionStore, Arc<ManualClock>>;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 1, 1, 1, 2, 3).unwrap()
    }

    fn dataset() -> PermissionDataset {
        serde_json::from_value(serde_json::json!({
            "resources": [
                {"id": 1, "authorization_updated_at": "2012-01-01T00:00:00Z"},
                {"id": 2},
            ],
            "user_roles": [
                {"user": "marius", "resource_id": 1, "role": "admin"},
                {"user": "dave.loper", "resource_id": 1, "role": "codeviewer"},
                {"user": "marius", "resource_id": 2, "role": "admin"},
            ],
            "group_roles": [
                {"group": null, "resource_id": 1, "role": "user"},
                {"group": "sonar-users", "resource_id": 1, "role": "user"},
                {"group": "sonar-administrators", "resource_id": 1, "role": "admin"},
                {"group": null, "resource_id": 2, "role": "user"},
            ],
            "templates": [
                {
                    "key": "default_20130101_010203",
                    "name": "Default template",
                    "grants": [
                        {"principal": {"kind": "user", "id": "marius"}, "role": "admin"},
                        {"principal": {"kind": "group", "id": "sonar-administrators"}, "role": "issueadmin"},
                        {"principal": {"kind": "group", "id": null}, "role": "codeviewer"},
                    ],
                },
                {
                    "key": "empty_template",
                    "name": "Empty",
                },
                {
                    "key": "browse_only",
                    "name": "Browse only",
                    "grants": [
                        {"principal": {"kind": "user", "id": "marius"}, "role": "user"},
                    ],
                },
                {
                    "key": "sonar_projects",
                    "name": "Sonar projects",
                    "key_pattern": "org\\.sonar\\..*",
                    "grants": [
                        {"principal": {"kind": "group", "id": "sonar-users"}, "role": "user"},
                    ],
                },
            ],
        }))
        .unwrap()
    }

    fn facade() -> (Facade, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        (
            PermissionFacade::with_clock(InMemoryPermissionStore::with_dataset(dataset()), clock.clone()),
            clock,
        )
    }

    fn r(id: i64) -> ResourceId {
        ResourceId::new(id)
    }

    #[tokio::test]
    async fn reads_see_seeded_grants() {
        warden_observability::init_test();
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        let roles = facade
            .select_user_permissions(&mut session, &UserId::new("marius"), r(1))
            .await
            .unwrap();
        assert_eq!(roles, BTreeSet::from([Role::ADMIN]));
        assert_eq!(facade.count_component_permissions(&mut session, r(1)).await.unwrap(), 5);
        assert_eq!(facade.count_component_permissions(&mut session, r(99)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_user_permission_is_idempotent_and_stamps() {
        let (facade, clock) = facade();
        let mut session = facade.begin().await.unwrap();
        let user = UserId::new("dave.loper");

        facade
            .insert_user_permission(&mut session, r(2), &user, &Role::USER)
            .await
            .unwrap();
        clock.advance(Duration::seconds(5));
        facade
            .insert_user_permission(&mut session, r(2), &user, &Role::USER)
            .await
            .unwrap();

        let roles = facade.select_user_permissions(&mut session, &user, r(2)).await.unwrap();
        assert_eq!(roles, BTreeSet::from([Role::USER]));
        assert_eq!(facade.count_component_permissions(&mut session, r(2)).await.unwrap(), 3);
        assert_eq!(
            facade.authorization_updated_at(&mut session, r(2)).await.unwrap(),
            Some(t0() + Duration::seconds(5))
        );
    }

    #[tokio::test]
    async fn deleting_a_missing_grant_succeeds_and_stamps() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        facade
            .delete_user_permission(&mut session, r(2), &UserId::new("nobody"), &Role::ADMIN)
            .await
            .unwrap();
        facade
            .delete_group_permission(&mut session, r(2), &GroupRef::named("ghosts"), &Role::USER)
            .await
            .unwrap();

        assert_eq!(facade.count_component_permissions(&mut session, r(2)).await.unwrap(), 2);
        assert_eq!(facade.authorization_updated_at(&mut session, r(2)).await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn anyone_and_named_groups_are_isolated() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        facade
            .delete_group_permission(&mut session, r(1), &GroupRef::Anyone, &Role::USER)
            .await
            .unwrap();

        let anyone = facade
            .select_group_permissions(&mut session, &GroupRef::Anyone, r(1))
            .await
            .unwrap();
        let users = facade
            .select_group_permissions(&mut session, &GroupRef::named("sonar-users"), r(1))
            .await
            .unwrap();
        assert!(anyone.is_empty());
        assert_eq!(users, BTreeSet::from([Role::USER]));

        // A group literally named "Anyone" is just another group.
        facade
            .insert_group_permission(&mut session, r(1), &GroupRef::named("Anyone"), &Role::ADMIN)
            .await
            .unwrap();
        assert!(
            facade
                .select_group_permissions(&mut session, &GroupRef::Anyone, r(1))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn apply_template_replaces_all_grants() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        facade
            .apply_permission_template(&mut session, "default_20130101_010203", r(1))
            .await
            .unwrap();

        assert_eq!(facade.count_component_permissions(&mut session, r(1)).await.unwrap(), 3);
        assert_eq!(
            facade
                .select_user_permissions(&mut session, &UserId::new("dave.loper"), r(1))
                .await
                .unwrap(),
            BTreeSet::new()
        );
        assert_eq!(
            facade
                .select_group_permissions(&mut session, &GroupRef::Anyone, r(1))
                .await
                .unwrap(),
            BTreeSet::from([Role::CODE_VIEWER])
        );
        assert_eq!(
            facade
                .select_group_permissions(&mut session, &GroupRef::named("sonar-administrators"), r(1))
                .await
                .unwrap(),
            BTreeSet::from([Role::ISSUE_ADMIN])
        );
        // Other resources keep their grants.
        assert_eq!(facade.count_component_permissions(&mut session, r(2)).await.unwrap(), 2);
        assert_eq!(facade.authorization_updated_at(&mut session, r(1)).await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn template_roles_replace_rather_than_merge() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();
        let marius = UserId::new("marius");

        facade
            .apply_permission_template(&mut session, "browse_only", r(2))
            .await
            .unwrap();

        assert_eq!(
            facade.select_user_permissions(&mut session, &marius, r(2)).await.unwrap(),
            BTreeSet::from([Role::USER])
        );
        assert_eq!(facade.count_component_permissions(&mut session, r(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_template_clears_the_resource() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        facade
            .apply_permission_template(&mut session, "empty_template", r(1))
            .await
            .unwrap();
        assert_eq!(facade.count_component_permissions(&mut session, r(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_template_fails_without_mutation() {
        let (facade, _) = facade();
        let before = facade.store().snapshot().await;
        let mut session = facade.begin().await.unwrap();

        let err = facade
            .apply_permission_template(&mut session, "nope", r(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::TemplateNotFound(ref key) if key == "nope"));
        session.commit().await.unwrap();

        assert_eq!(facade.store().snapshot().await, before);
    }

    #[tokio::test]
    async fn remove_all_permissions_only_touches_one_resource() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        facade.remove_all_permissions(&mut session, r(1)).await.unwrap();

        assert_eq!(facade.count_component_permissions(&mut session, r(1)).await.unwrap(), 0);
        assert_eq!(facade.count_component_permissions(&mut session, r(2)).await.unwrap(), 2);
        assert_eq!(facade.authorization_updated_at(&mut session, r(1)).await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn rollback_discards_writes_and_stamp() {
        let (facade, _) = facade();
        let before = facade.store().snapshot().await;

        let mut session = facade.begin().await.unwrap();
        facade
            .insert_user_permission(&mut session, r(1), &UserId::new("newbie"), &Role::USER)
            .await
            .unwrap();
        session.rollback().await.unwrap();

        let mut session = facade.begin().await.unwrap();
        assert!(
            facade
                .select_user_permissions(&mut session, &UserId::new("newbie"), r(1))
                .await
                .unwrap()
                .is_empty()
        );
        drop(session);
        assert_eq!(facade.store().snapshot().await, before);
    }

    #[tokio::test]
    async fn stamp_on_resource_without_row_is_ignored() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        facade
            .insert_user_permission(&mut session, r(42), &UserId::new("marius"), &Role::USER)
            .await
            .unwrap();
        assert_eq!(facade.authorization_updated_at(&mut session, r(42)).await.unwrap(), None);
        assert_eq!(facade.count_component_permissions(&mut session, r(42)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn key_pattern_beats_configured_defaults() {
        let (facade, _) = facade();
        let facade = facade.with_settings(
            PermissionSettings::default()
                .with_default_template("empty_template")
                .with_qualifier_default("TRK", "default_20130101_010203"),
        );
        let mut session = facade.begin().await.unwrap();

        assert_eq!(
            facade
                .applicable_template_key(&mut session, "org.sonar.core", "TRK")
                .await
                .unwrap(),
            "sonar_projects"
        );
        assert_eq!(
            facade
                .applicable_template_key(&mut session, "com.acme", "TRK")
                .await
                .unwrap(),
            "default_20130101_010203"
        );
        assert_eq!(
            facade
                .applicable_template_key(&mut session, "com.acme", "VW")
                .await
                .unwrap(),
            "empty_template"
        );
    }

    #[tokio::test]
    async fn no_applicable_template_is_an_error() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        let err = facade
            .grant_default_roles(&mut session, r(2), "com.acme", "TRK")
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::NoApplicableTemplate { .. }));
        assert_eq!(facade.count_component_permissions(&mut session, r(2)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ambiguous_key_patterns_are_rejected() {
        let store = InMemoryPermissionStore::with_dataset(PermissionDataset {
            templates: vec![
                PermissionTemplate::new("a", "A").with_key_pattern("org\\..*"),
                PermissionTemplate::new("b", "B").with_key_pattern(".*sonar.*"),
            ],
            ..PermissionDataset::default()
        });
        let facade = PermissionFacade::new(store);
        let mut session = facade.begin().await.unwrap();

        match facade
            .applicable_template_key(&mut session, "org.sonar.core", "TRK")
            .await
        {
            Err(PermissionError::AmbiguousTemplates { keys, .. }) => assert_eq!(keys, vec!["a", "b"]),
            other => panic!("expected AmbiguousTemplates, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_key_pattern_is_reported() {
        let store = InMemoryPermissionStore::with_dataset(PermissionDataset {
            templates: vec![PermissionTemplate::new("broken", "Broken").with_key_pattern("(")],
            ..PermissionDataset::default()
        });
        let facade = PermissionFacade::new(store);
        let mut session = facade.begin().await.unwrap();

        let err = facade
            .applicable_template_key(&mut session, "anything", "TRK")
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::InvalidKeyPattern(_)));
    }

    #[tokio::test]
    async fn grant_default_roles_applies_matching_template() {
        let (facade, _) = facade();
        let mut session = facade.begin().await.unwrap();

        facade
            .grant_default_roles(&mut session, r(2), "org.sonar.batch", "TRK")
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut session = facade.begin().await.unwrap();
        assert_eq!(facade.count_component_permissions(&mut session, r(2)).await.unwrap(), 1);
        assert_eq!(
            facade
                .select_group_permissions(&mut session, &GroupRef::named("sonar-users"), r(2))
                .await
                .unwrap(),
            BTreeSet::from([Role::USER])
        );
    }

    proptest! {
        /// Writes to named groups never show up under Anyone, and vice versa.
        #[test]
        fn group_writes_stay_with_their_group(
            ops in proptest::collection::vec((proptest::option::of("[a-c]"), any::<bool>()), 1..30),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let facade = PermissionFacade::new(InMemoryPermissionStore::new());
                let mut session = facade.begin().await.unwrap();
                let mut model: BTreeSet<GroupRef> = BTreeSet::new();

                for (name, insert) in ops {
                    let group = name.map_or(GroupRef::Anyone, GroupRef::named);
                    if insert {
                        facade.insert_group_permission(&mut session, r(1), &group, &Role::USER).await.unwrap();
                        model.insert(group);
                    } else {
                        facade.delete_group_permission(&mut session, r(1), &group, &Role::USER).await.unwrap();
                        model.remove(&group);
                    }
                }

                let candidates = [GroupRef::Anyone, GroupRef::named("a"), GroupRef::named("b"), GroupRef::named("c")];
                for group in candidates {
                    let roles = facade.select_group_permissions(&mut session, &group, r(1)).await.unwrap();
                    prop_assert_eq!(!roles.is_empty(), model.contains(&group));
                }
                Ok::<(), proptest::test_runner::TestCaseError>(())
            })?;
        }
    }
}
