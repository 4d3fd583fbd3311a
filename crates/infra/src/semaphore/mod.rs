//! Persisted, lease-based named locks.
//!
//! Processes sharing one database coordinate through a `semaphores` table:
//! one row per lock name, stamped with when it was taken and for how long.
//! Mutual exclusion comes entirely from the store's atomic row operations
//! (unique insert and compare-and-set update).

pub mod database;
pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use database::{Acquisition, DatabaseSemaphore, SemaphoreError};
pub use in_memory::InMemorySemaphoreStore;
pub use postgres::PostgresSemaphoreStore;
pub use r#trait::{Lease, SemaphoreRow, SemaphoreStore};
