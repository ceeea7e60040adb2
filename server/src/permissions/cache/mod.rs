//! Permission cache: (user, channel) → computed [`Permissions`].
//!
//! The cache is never the source of truth. Entries carry a short TTL so that a missed
//! invalidation heals by itself, and every failure here is absorbed by the resolver and
//! the publisher.

mod memory;
mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryPermissionCache;
pub use redis::RedisPermissionCache;

use super::flags::Permissions;

/// Cache backend failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Malformed cached value: {0}")]
    Malformed(String),
}

/// Shared cache of resolved permissions.
#[async_trait]
pub trait PermissionCache: Send + Sync {
    async fn get(&self, user_id: Uuid, channel_id: Uuid)
        -> Result<Option<Permissions>, CacheError>;

    async fn set(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
        permissions: Permissions,
    ) -> Result<(), CacheError>;

    /// Cached entries for one user across channels. Misses are absent from the map.
    async fn get_many(
        &self,
        user_id: Uuid,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError>;

    /// Store entries for one user, keyed by channel id.
    async fn set_many(
        &self,
        user_id: Uuid,
        entries: &HashMap<Uuid, Permissions>,
    ) -> Result<(), CacheError>;

    /// Cached entries for one channel across users. Misses are absent from the map.
    async fn get_many_users(
        &self,
        channel_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError>;

    /// Store entries for one channel, keyed by user id.
    async fn set_many_users(
        &self,
        channel_id: Uuid,
        entries: &HashMap<Uuid, Permissions>,
    ) -> Result<(), CacheError>;

    async fn delete_by_user(&self, user_id: Uuid) -> Result<(), CacheError>;

    async fn delete_by_channel(&self, channel_id: Uuid) -> Result<(), CacheError>;

    async fn delete_exact(&self, user_id: Uuid, channel_id: Uuid) -> Result<(), CacheError>;

    async fn delete_all(&self) -> Result<(), CacheError>;
}
