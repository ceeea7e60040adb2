//! Reusable test helpers for resolver and service integration tests.
//!
//! Provides [`MemoryStore`], an in-memory [`PermissionStore`] + [`OverrideStore`] that
//! counts every call, and [`FailingCache`], a cache whose every operation fails.
//!
//! ## Live backends
//!
//! Tests against PostgreSQL or Redis read `DATABASE_URL`/`REDIS_URL` (see
//! `Config::default_for_test`) and are `#[ignore]`d.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use vc_authz::permissions::{
    CacheError, ChannelInfo, MemoryPermissionCache, OverrideStore, PermissionCache,
    PermissionOverride, PermissionStore, Permissions, PrincipalType, RolePermission,
    TargetType,
};
use vc_authz::{Authz, AuthzError};

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory server state with a call counter on every store method.
pub struct MemoryStore {
    everyone_id: Uuid,
    roles: RwLock<HashMap<Uuid, Permissions>>,
    members: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    channels: RwLock<HashMap<Uuid, String>>,
    overrides: RwLock<Vec<PermissionOverride>>,
    owner: RwLock<Option<Uuid>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    /// A server whose @everyone role grants `everyone`.
    pub fn with_everyone(everyone: Permissions) -> Arc<Self> {
        let everyone_id = Uuid::now_v7();
        Arc::new(Self {
            everyone_id,
            roles: RwLock::new(HashMap::from([(everyone_id, everyone)])),
            members: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            overrides: RwLock::new(Vec::new()),
            owner: RwLock::new(None),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    pub fn everyone_id(&self) -> Uuid {
        self.everyone_id
    }

    pub fn add_role(&self, permissions: Permissions) -> Uuid {
        let id = Uuid::now_v7();
        self.roles.write().unwrap().insert(id, permissions);
        id
    }

    pub fn set_role_permissions(&self, role_id: Uuid, permissions: Permissions) {
        self.roles.write().unwrap().insert(role_id, permissions);
    }

    /// Register a member holding `roles` and return their id.
    pub fn add_member(&self, roles: &[Uuid]) -> Uuid {
        let id = Uuid::now_v7();
        self.assign_roles(id, roles);
        id
    }

    /// Replace a member's explicit roles.
    pub fn assign_roles(&self, user_id: Uuid, roles: &[Uuid]) {
        self.members
            .write()
            .unwrap()
            .insert(user_id, roles.iter().copied().collect());
    }

    pub fn add_channel(&self, name: &str) -> Uuid {
        let id = Uuid::now_v7();
        self.channels.write().unwrap().insert(id, name.to_string());
        id
    }

    pub fn set_owner(&self, owner: Option<Uuid>) {
        *self.owner.write().unwrap() = owner;
    }

    /// Insert or replace a channel override directly, bypassing the call counter.
    pub fn put_override(
        &self,
        channel_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
        allow: Permissions,
        deny: Permissions,
    ) -> PermissionOverride {
        let mut overrides = self.overrides.write().unwrap();
        let now = Utc::now();
        if let Some(existing) = overrides.iter_mut().find(|o| {
            o.target_type == TargetType::Channel
                && o.target_id == channel_id
                && o.principal_type == principal_type
                && o.principal_id == principal_id
        }) {
            existing.allow = allow;
            existing.deny = deny;
            existing.updated_at = now;
            return existing.clone();
        }

        let ovr = PermissionOverride {
            id: Uuid::now_v7(),
            target_type: TargetType::Channel,
            target_id: channel_id,
            principal_type,
            principal_id,
            allow,
            deny,
            created_at: now,
            updated_at: now,
        };
        overrides.push(ovr.clone());
        ovr
    }

    /// Number of store calls since creation or the last [`Self::reset_calls`].
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Make every subsequent store call fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn enter(&self) -> Result<(), AuthzError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthzError::storage(std::io::Error::other(
                "connection refused",
            )));
        }
        Ok(())
    }

    fn roles_of(&self, user_id: Uuid) -> Vec<RolePermission> {
        let roles = self.roles.read().unwrap();
        let members = self.members.read().unwrap();
        let explicit = members.get(&user_id).cloned().unwrap_or_default();

        roles
            .iter()
            .filter(|(id, _)| **id == self.everyone_id || explicit.contains(id))
            .map(|(id, perms)| RolePermission {
                role_id: *id,
                permissions: *perms,
            })
            .collect()
    }

    fn channel_overrides(&self, channel_id: Uuid) -> Vec<PermissionOverride> {
        self.overrides
            .read()
            .unwrap()
            .iter()
            .filter(|o| o.target_type == TargetType::Channel && o.target_id == channel_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn role_permissions(&self, user_id: Uuid) -> Result<Vec<RolePermission>, AuthzError> {
        self.enter()?;
        Ok(self.roles_of(user_id))
    }

    async fn role_permissions_many(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<RolePermission>>, AuthzError> {
        self.enter()?;
        Ok(user_ids
            .iter()
            .map(|&id| (id, self.roles_of(id)))
            .collect())
    }

    async fn channel_info(&self, channel_id: Uuid) -> Result<ChannelInfo, AuthzError> {
        self.enter()?;
        self.channels
            .read()
            .unwrap()
            .get(&channel_id)
            .map(|name| ChannelInfo {
                id: channel_id,
                name: name.clone(),
            })
            .ok_or(AuthzError::ChannelNotFound(channel_id))
    }

    async fn channel_info_many(
        &self,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ChannelInfo>, AuthzError> {
        self.enter()?;
        let channels = self.channels.read().unwrap();
        Ok(channel_ids
            .iter()
            .filter_map(|id| {
                channels.get(id).map(|name| {
                    (
                        *id,
                        ChannelInfo {
                            id: *id,
                            name: name.clone(),
                        },
                    )
                })
            })
            .collect())
    }

    async fn overrides(
        &self,
        _target_type: TargetType,
        target_id: Uuid,
    ) -> Result<Vec<PermissionOverride>, AuthzError> {
        self.enter()?;
        Ok(self.channel_overrides(target_id))
    }

    async fn overrides_many(
        &self,
        _target_type: TargetType,
        target_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<PermissionOverride>>, AuthzError> {
        self.enter()?;
        Ok(target_ids
            .iter()
            .map(|&id| (id, self.channel_overrides(id)))
            .collect())
    }

    async fn owner_id(&self) -> Result<Option<Uuid>, AuthzError> {
        self.enter()?;
        Ok(*self.owner.read().unwrap())
    }
}

#[async_trait]
impl OverrideStore for MemoryStore {
    async fn set(
        &self,
        _target_type: TargetType,
        target_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<PermissionOverride, AuthzError> {
        self.enter()?;
        Ok(self.put_override(target_id, principal_type, principal_id, allow, deny))
    }

    async fn delete(
        &self,
        target_type: TargetType,
        target_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> Result<(), AuthzError> {
        self.enter()?;
        let mut overrides = self.overrides.write().unwrap();
        let before = overrides.len();
        overrides.retain(|o| {
            !(o.target_type == target_type
                && o.target_id == target_id
                && o.principal_type == principal_type
                && o.principal_id == principal_id)
        });
        if overrides.len() == before {
            return Err(AuthzError::OverrideNotFound);
        }
        Ok(())
    }

    async fn list(
        &self,
        _target_type: TargetType,
        target_id: Uuid,
    ) -> Result<Vec<PermissionOverride>, AuthzError> {
        self.enter()?;
        let mut rows = self.channel_overrides(target_id);
        rows.sort_by_key(|o| o.created_at);
        Ok(rows)
    }
}

// ============================================================================
// Caches
// ============================================================================

/// Cache whose every operation fails, standing in for an unreachable Redis.
#[derive(Default)]
pub struct FailingCache {
    calls: AtomicUsize,
}

impl FailingCache {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Malformed("cache unavailable".into()))
    }
}

#[async_trait]
impl PermissionCache for FailingCache {
    async fn get(&self, _: Uuid, _: Uuid) -> Result<Option<Permissions>, CacheError> {
        self.fail()
    }

    async fn set(&self, _: Uuid, _: Uuid, _: Permissions) -> Result<(), CacheError> {
        self.fail()
    }

    async fn get_many(
        &self,
        _: Uuid,
        _: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError> {
        self.fail()
    }

    async fn set_many(&self, _: Uuid, _: &HashMap<Uuid, Permissions>) -> Result<(), CacheError> {
        self.fail()
    }

    async fn get_many_users(
        &self,
        _: Uuid,
        _: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError> {
        self.fail()
    }

    async fn set_many_users(
        &self,
        _: Uuid,
        _: &HashMap<Uuid, Permissions>,
    ) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete_by_user(&self, _: Uuid) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete_by_channel(&self, _: Uuid) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete_exact(&self, _: Uuid, _: Uuid) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete_all(&self) -> Result<(), CacheError> {
        self.fail()
    }
}

pub fn memory_cache() -> Arc<MemoryPermissionCache> {
    Arc::new(MemoryPermissionCache::new(Duration::from_secs(60)))
}

// ============================================================================
// Service fixtures
// ============================================================================

/// Authz over `store` and `cache`, the store serving both read and write paths.
pub fn authz_with(store: &Arc<MemoryStore>, cache: Arc<dyn PermissionCache>) -> Authz {
    Authz::new(store.clone(), store.clone(), cache)
}

/// Authz over `store` with a fresh in-memory cache, returned for inspection.
pub fn authz(store: &Arc<MemoryStore>) -> (Authz, Arc<MemoryPermissionCache>) {
    let cache = memory_cache();
    (authz_with(store, cache.clone()), cache)
}
