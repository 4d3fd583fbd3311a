//! Infrastructure layer: persisted semaphores, authorization tables, config.

pub mod config;
pub mod permissions;
pub mod semaphore;
pub mod store;

pub use config::PermissionSettings;
