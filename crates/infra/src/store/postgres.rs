//! Postgres session and error mapping shared by the Postgres repositories.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Conflict` |
//! | Database (deadlock detected) | `40P01` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed | N/A | `Closed` |
//! | ColumnDecode / Decode | N/A | `Decode` |
//! | Other | N/A | `Storage` |

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::{Session, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_authorization.sql");

/// A Postgres transaction used as a repository session.
///
/// Wrap a transaction obtained from the caller's own pool to run repository
/// operations alongside the caller's statements in one unit of work.
#[derive(Debug)]
pub struct PgSession(Transaction<'static, Postgres>);

impl PgSession {
    pub async fn begin(pool: &PgPool) -> Result<Self, StoreError> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Self(tx))
    }

    /// Connection for running further statements inside this session.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.0
    }
}

impl From<Transaction<'static, Postgres>> for PgSession {
    fn from(tx: Transaction<'static, Postgres>) -> Self {
        Self(tx)
    }
}

#[async_trait]
impl Session for PgSession {
    async fn commit(self) -> Result<(), StoreError> {
        self.0
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.0
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

/// Create the semaphore and authorization tables if they do not exist yet.
///
/// Intended for tests and embedded deployments; production schemas are owned
/// by the host's migration tooling.
pub async fn install_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("install_schema", e))?;
    Ok(())
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Closed(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
