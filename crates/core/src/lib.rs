//! `warden-core` — identifiers, time source, and the domain error model.
//!
//! This crate contains no storage or transport concerns.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{GroupName, ResourceId, UserId};
