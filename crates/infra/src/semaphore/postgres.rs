//! Postgres-backed semaphore table.
//!
//! Each trait method is exactly one SQL statement executed in autocommit mode,
//! so its atomicity comes from the database:
//! - `insert_if_absent` relies on the primary key (`ON CONFLICT DO NOTHING`);
//! - `compare_and_set` is an `UPDATE ... WHERE locked_at = $expected`; a
//!   concurrent updater blocks on the row lock and then re-checks the predicate
//!   against the committed row, so only one caller observes `rows_affected = 1`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::store::StoreError;
use crate::store::postgres::map_sqlx_error;

use super::r#trait::{SemaphoreRow, SemaphoreStore};

/// Postgres-backed semaphore store.
#[derive(Debug, Clone)]
pub struct PostgresSemaphoreStore {
    pool: Arc<PgPool>,
}

impl PostgresSemaphoreStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl SemaphoreStore for PostgresSemaphoreStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<SemaphoreRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT name, locked_at, max_duration_seconds, created_at, updated_at
            FROM semaphores
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_semaphore", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let max_duration_seconds: i32 = row
            .try_get("max_duration_seconds")
            .map_err(|e| map_sqlx_error("find_semaphore", e))?;

        Ok(Some(SemaphoreRow {
            name: row
                .try_get("name")
                .map_err(|e| map_sqlx_error("find_semaphore", e))?,
            locked_at: row
                .try_get("locked_at")
                .map_err(|e| map_sqlx_error("find_semaphore", e))?,
            max_duration_seconds: u32::try_from(max_duration_seconds).map_err(|_| {
                StoreError::Decode(format!(
                    "semaphore '{name}' has negative max_duration_seconds {max_duration_seconds}"
                ))
            })?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| map_sqlx_error("find_semaphore", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| map_sqlx_error("find_semaphore", e))?,
        }))
    }

    async fn insert_if_absent(
        &self,
        name: &str,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO semaphores (name, locked_at, max_duration_seconds, created_at, updated_at)
            VALUES ($1, $2, $3, $2, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(locked_at)
        .bind(duration_param(max_duration_seconds)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_semaphore", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set(
        &self,
        name: &str,
        expected_locked_at: DateTime<Utc>,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE semaphores
            SET locked_at = $3,
                max_duration_seconds = $4,
                updated_at = $3
            WHERE name = $1 AND locked_at = $2
            "#,
        )
        .bind(name)
        .bind(expected_locked_at)
        .bind(locked_at)
        .bind(duration_param(max_duration_seconds)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_semaphore", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_key(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM semaphores WHERE name = $1")
            .bind(name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_semaphore", e))?;
        Ok(())
    }
}

fn duration_param(seconds: u32) -> Result<i32, StoreError> {
    i32::try_from(seconds)
        .map_err(|_| StoreError::Storage(format!("max_duration_seconds {seconds} exceeds INTEGER range")))
}
