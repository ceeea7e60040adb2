//! In-process permission cache.
//!
//! Uses `DashMap` for lock-free concurrent access. Only correct when a single server
//! process owns the cache, since invalidations do not reach other processes.
//!
//! Expired entries are dropped when read, and by a full sweep every [`SWEEP_EVERY`]
//! writes, so keys that are written once and never read again do not accumulate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{CacheError, PermissionCache};
use crate::permissions::flags::Permissions;

/// Writes between two sweeps of expired entries.
pub const SWEEP_EVERY: usize = 1024;

/// Cached permissions paired with their expiry.
#[derive(Debug, Clone, Copy)]
struct CachedEntry {
    permissions: Permissions,
    expires_at: Instant,
}

/// Thread-safe per-process cache keyed by (user, channel).
#[derive(Debug)]
pub struct MemoryPermissionCache {
    entries: DashMap<(Uuid, Uuid), CachedEntry>,
    ttl: Duration,
    writes: AtomicUsize,
}

impl MemoryPermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of stored entries, expired ones included until they are read or swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn read(&self, user_id: Uuid, channel_id: Uuid) -> Option<Permissions> {
        let key = (user_id, channel_id);
        let entry = *self.entries.get(&key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.permissions);
        }
        self.entries
            .remove_if(&key, |_, current| current.expires_at <= Instant::now());
        None
    }

    fn write(&self, user_id: Uuid, channel_id: Uuid, permissions: Permissions) {
        self.entries.insert(
            (user_id, channel_id),
            CachedEntry {
                permissions,
                expires_at: Instant::now() + self.ttl,
            },
        );

        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl PermissionCache for MemoryPermissionCache {
    async fn get(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
    ) -> Result<Option<Permissions>, CacheError> {
        Ok(self.read(user_id, channel_id))
    }

    async fn set(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
        permissions: Permissions,
    ) -> Result<(), CacheError> {
        self.write(user_id, channel_id, permissions);
        Ok(())
    }

    async fn get_many(
        &self,
        user_id: Uuid,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError> {
        Ok(channel_ids
            .iter()
            .filter_map(|&channel_id| {
                self.read(user_id, channel_id)
                    .map(|perms| (channel_id, perms))
            })
            .collect())
    }

    async fn set_many(
        &self,
        user_id: Uuid,
        entries: &HashMap<Uuid, Permissions>,
    ) -> Result<(), CacheError> {
        for (&channel_id, &perms) in entries {
            self.write(user_id, channel_id, perms);
        }
        Ok(())
    }

    async fn get_many_users(
        &self,
        channel_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError> {
        Ok(user_ids
            .iter()
            .filter_map(|&user_id| self.read(user_id, channel_id).map(|perms| (user_id, perms)))
            .collect())
    }

    async fn set_many_users(
        &self,
        channel_id: Uuid,
        entries: &HashMap<Uuid, Permissions>,
    ) -> Result<(), CacheError> {
        for (&user_id, &perms) in entries {
            self.write(user_id, channel_id, perms);
        }
        Ok(())
    }

    async fn delete_by_user(&self, user_id: Uuid) -> Result<(), CacheError> {
        self.entries.retain(|(user, _), _| *user != user_id);
        Ok(())
    }

    async fn delete_by_channel(&self, channel_id: Uuid) -> Result<(), CacheError> {
        self.entries.retain(|(_, channel), _| *channel != channel_id);
        Ok(())
    }

    async fn delete_exact(&self, user_id: Uuid, channel_id: Uuid) -> Result<(), CacheError> {
        self.entries.remove(&(user_id, channel_id));
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}
