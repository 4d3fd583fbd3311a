//! Try-once mutual exclusion across processes sharing one store.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::instrument;

use warden_core::{Clock, SystemClock};

use crate::store::StoreError;

use super::r#trait::{Lease, SemaphoreStore};

#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("semaphore name must not be empty")]
    InvalidName,

    #[error("semaphore max duration must be positive")]
    InvalidDuration,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a single acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// The caller now holds the lease.
    Acquired(Lease),
    /// Someone else holds an unexpired lease.
    Held(Lease),
    /// The row changed between our reads and writes (a concurrent acquire,
    /// steal, or release). Nothing was written; try again later.
    Contended,
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

/// Named, lease-based lock persisted in a shared store.
///
/// - `acquire` never blocks and never retries; callers that want to wait must
///   poll.
/// - A lease whose duration has elapsed can be taken over by any caller
///   without a `release`, which recovers locks left by crashed holders.
/// - `release` frees the name unconditionally. It does not check that the
///   caller is the current holder: a caller whose lease expired and was taken
///   over can still release the new holder's lease.
#[derive(Debug, Clone)]
pub struct DatabaseSemaphore<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S> DatabaseSemaphore<S>
where
    S: SemaphoreStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: SystemClock,
        }
    }
}

impl<S, C> DatabaseSemaphore<S, C>
where
    S: SemaphoreStore,
    C: Clock,
{
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Try once to take `name` for `max_duration_seconds`.
    ///
    /// `Ok(false)` means the lock is held elsewhere (or was contended); it is
    /// an expected outcome, not an error.
    pub async fn acquire(&self, name: &str, max_duration_seconds: u32) -> Result<bool, SemaphoreError> {
        Ok(self.try_acquire(name, max_duration_seconds).await?.is_acquired())
    }

    /// Try once to take `name`, reporting the current holder on failure.
    #[instrument(skip(self), err)]
    pub async fn try_acquire(
        &self,
        name: &str,
        max_duration_seconds: u32,
    ) -> Result<Acquisition, SemaphoreError> {
        let name = validate_name(name)?;
        if max_duration_seconds == 0 {
            return Err(SemaphoreError::InvalidDuration);
        }

        let now = self.clock.now();

        if self
            .store
            .insert_if_absent(name, now, max_duration_seconds)
            .await?
        {
            tracing::debug!(semaphore = name, "acquired free semaphore");
            return Ok(Acquisition::Acquired(self.fresh_lease(name, now, max_duration_seconds)));
        }

        let Some(current) = self.store.find_by_name(name).await? else {
            tracing::debug!(semaphore = name, "semaphore released while acquiring");
            return Ok(Acquisition::Contended);
        };

        if !current.is_expired(now) {
            tracing::debug!(
                semaphore = name,
                expires_at = %current.expires_at(),
                "semaphore is held"
            );
            return Ok(Acquisition::Held(current.lease()));
        }

        if self
            .store
            .compare_and_set(name, current.locked_at, now, max_duration_seconds)
            .await?
        {
            tracing::info!(
                semaphore = name,
                previous_locked_at = %current.locked_at,
                "took over expired semaphore"
            );
            Ok(Acquisition::Acquired(self.fresh_lease(name, now, max_duration_seconds)))
        } else {
            tracing::debug!(semaphore = name, "lost race for expired semaphore");
            Ok(Acquisition::Contended)
        }
    }

    /// Free `name` regardless of who holds it.
    #[instrument(skip(self), err)]
    pub async fn release(&self, name: &str) -> Result<(), SemaphoreError> {
        let name = validate_name(name)?;
        self.store.delete_by_key(name).await?;
        tracing::debug!(semaphore = name, "released semaphore");
        Ok(())
    }

    /// Current lease for `name`, expired or not; `None` if nobody ever took it
    /// or it was released.
    pub async fn lease(&self, name: &str) -> Result<Option<Lease>, SemaphoreError> {
        let name = validate_name(name)?;
        Ok(self.store.find_by_name(name).await?.map(|row| row.lease()))
    }

    fn fresh_lease(&self, name: &str, now: DateTime<Utc>, max_duration_seconds: u32) -> Lease {
        Lease {
            name: name.to_string(),
            locked_at: now,
            expires_at: now + Duration::seconds(i64::from(max_duration_seconds)),
        }
    }
}

fn validate_name(name: &str) -> Result<&str, SemaphoreError> {
    if name.trim().is_empty() {
        Err(SemaphoreError::InvalidName)
    } else {
        Ok(name)
    }
}
