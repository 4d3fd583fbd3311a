//! Resource authorization: user and group role grants, permission templates,
//! and the `authorization_updated_at` freshness stamp.

pub mod facade;
pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use facade::{PermissionError, PermissionFacade};
pub use in_memory::{InMemoryPermissionStore, InMemorySession, PermissionDataset, ResourceRow, Tables};
pub use postgres::PostgresPermissionStore;
pub use r#trait::PermissionStore;
