//! `warden-auth` — authorization schema: roles, grantees, grants and templates.
//!
//! This crate is intentionally decoupled from storage; persistence lives in
//! `warden-infra`.

pub mod grant;
pub mod group;
pub mod roles;
pub mod template;

pub use grant::{GroupPermission, PrincipalRef, ResourcePermissions, UserPermission};
pub use group::GroupRef;
pub use roles::Role;
pub use template::{KeyPatternError, PermissionTemplate, TemplateGrant};
