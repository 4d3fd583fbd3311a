use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// One persisted semaphore row (one row per lock name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreRow {
    pub name: String,
    /// Time of the last successful acquisition.
    pub locked_at: DateTime<Utc>,
    /// Lease length requested by the current holder.
    pub max_duration_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SemaphoreRow {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.locked_at + Duration::seconds(i64::from(self.max_duration_seconds))
    }

    /// A lease is stale once its full duration has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn lease(&self) -> Lease {
        Lease {
            name: self.name.clone(),
            locked_at: self.locked_at,
            expires_at: self.expires_at(),
        }
    }
}

/// Read-only view of who-holds-what-until-when for a semaphore name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Time elapsed since the lease was taken, as seen at `now`.
    pub fn held_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.locked_at
    }
}

/// Row operations backing the distributed semaphore.
///
/// Every method is a single atomic statement against the shared store. The
/// acquire protocol is built only from these primitives; no implementation may
/// satisfy `insert_if_absent` or `compare_and_set` with a read followed by a
/// separate write.
#[async_trait]
pub trait SemaphoreStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<SemaphoreRow>, StoreError>;

    /// Create the row for `name` unless one exists. Returns whether this call inserted it.
    async fn insert_if_absent(
        &self,
        name: &str,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError>;

    /// Overwrite the row for `name` only if its `locked_at` still equals
    /// `expected_locked_at`. Returns whether this call won.
    async fn compare_and_set(
        &self,
        name: &str,
        expected_locked_at: DateTime<Utc>,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError>;

    /// Delete the row for `name`; deleting a missing row is not an error.
    async fn delete_by_key(&self, name: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> SemaphoreStore for Arc<S>
where
    S: SemaphoreStore + ?Sized,
{
    async fn find_by_name(&self, name: &str) -> Result<Option<SemaphoreRow>, StoreError> {
        (**self).find_by_name(name).await
    }

    async fn insert_if_absent(
        &self,
        name: &str,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError> {
        (**self)
            .insert_if_absent(name, locked_at, max_duration_seconds)
            .await
    }

    async fn compare_and_set(
        &self,
        name: &str,
        expected_locked_at: DateTime<Utc>,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError> {
        (**self)
            .compare_and_set(name, expected_locked_at, locked_at, max_duration_seconds)
            .await
    }

    async fn delete_by_key(&self, name: &str) -> Result<(), StoreError> {
        (**self).delete_by_key(name).await
    }
}
