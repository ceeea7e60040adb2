//! Permission system types and utilities.
//!
//! Channel-scoped permission model:
//! - Roles grant base permissions, @everyone included for every member
//! - Channel overrides adjust them per role, then per user
//! - The server owner bypasses everything

pub mod cache;
pub mod flags;
pub mod hierarchy;
pub mod models;
pub mod publisher;
pub mod queries;
pub mod resolver;
pub mod store;

pub use cache::{CacheError, MemoryPermissionCache, PermissionCache, RedisPermissionCache};
pub use flags::Permissions;
pub use hierarchy::{can_act, can_manage_role, can_moderate_member, HierarchyError};
pub use models::*;
pub use publisher::{
    Invalidation, InvalidationQueue, InvalidationSender, PermissionChange, Publisher,
};
pub use queries::{PgOverrideStore, PgPermissionStore};
pub use resolver::{compute_permissions, Resolver};
pub use store::{OverrideStore, PermissionStore};
