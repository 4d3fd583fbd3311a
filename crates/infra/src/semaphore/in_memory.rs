use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::StoreError;

use super::r#trait::{SemaphoreRow, SemaphoreStore};

/// In-memory semaphore table.
///
/// Intended for tests/dev and single-process deployments. Each operation holds
/// the table lock for its whole duration, which gives the same atomicity as a
/// single SQL statement.
#[derive(Debug, Default)]
pub struct InMemorySemaphoreStore {
    rows: RwLock<HashMap<String, SemaphoreRow>>,
}

impl InMemorySemaphoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored, held or stale.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl SemaphoreStore for InMemorySemaphoreStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<SemaphoreRow>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(name).cloned())
    }

    async fn insert_if_absent(
        &self,
        name: &str,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if rows.contains_key(name) {
            return Ok(false);
        }

        rows.insert(
            name.to_string(),
            SemaphoreRow {
                name: name.to_string(),
                locked_at,
                max_duration_seconds,
                created_at: locked_at,
                updated_at: locked_at,
            },
        );
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        name: &str,
        expected_locked_at: DateTime<Utc>,
        locked_at: DateTime<Utc>,
        max_duration_seconds: u32,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        match rows.get_mut(name) {
            Some(row) if row.locked_at == expected_locked_at => {
                row.locked_at = locked_at;
                row.max_duration_seconds = max_duration_seconds;
                row.updated_at = locked_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_by_key(&self, name: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        rows.remove(name);
        Ok(())
    }
}
