//! Permission resolution logic.
//!
//! Computes effective permissions for a user in a channel, reading through the shared
//! cache. Resolution order:
//! 1. Server owner has all permissions
//! 2. Base = OR of every role the user holds, @everyone included
//! 3. Role overrides on the channel: aggregated deny cleared, aggregated allow set
//! 4. User override on the channel, applied the same way on top

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::try_join;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cache::PermissionCache;
use super::flags::Permissions;
use super::models::{PermissionOverride, PrincipalType, RolePermission, TargetType};
use super::store::PermissionStore;
use crate::error::AuthzError;

/// Compute a user's permissions in one channel.
///
/// `overrides` are the channel's overrides in any order. Each layer is aggregated with OR
/// before it is applied, so the result does not depend on that order.
pub fn compute_permissions(
    user_id: Uuid,
    is_owner: bool,
    roles: &[RolePermission],
    overrides: &[PermissionOverride],
) -> Permissions {
    if is_owner {
        return Permissions::all();
    }

    let base = roles
        .iter()
        .fold(Permissions::empty(), |acc, role| acc | role.permissions);

    let role_ids: HashSet<Uuid> = roles.iter().map(|r| r.role_id).collect();

    let mut role_allow = Permissions::empty();
    let mut role_deny = Permissions::empty();
    let mut user_allow = Permissions::empty();
    let mut user_deny = Permissions::empty();

    for ovr in overrides {
        match ovr.principal_type {
            PrincipalType::Role if role_ids.contains(&ovr.principal_id) => {
                role_allow |= ovr.allow;
                role_deny |= ovr.deny;
            }
            PrincipalType::User if ovr.principal_id == user_id => {
                user_allow |= ovr.allow;
                user_deny |= ovr.deny;
            }
            _ => {}
        }
    }

    base.apply_layer(role_allow, role_deny)
        .apply_layer(user_allow, user_deny)
}

/// Ids in `ids` that are not in `hits`, first occurrence order, without duplicates.
fn unique_misses<V>(ids: &[Uuid], hits: &HashMap<Uuid, V>) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .copied()
        .filter(|id| !hits.contains_key(id) && seen.insert(*id))
        .collect()
}

/// Resolves effective channel permissions through the shared cache.
///
/// Holds no mutable state; clone freely.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn PermissionStore>,
    cache: Arc<dyn PermissionCache>,
}

impl Resolver {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<dyn PermissionCache>) -> Self {
        Self { store, cache }
    }

    /// Effective permissions of `user_id` in `channel_id`.
    ///
    /// An empty set is a valid result. Fails only on storage errors, including
    /// [`AuthzError::ChannelNotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, user_id: Uuid, channel_id: Uuid) -> Result<Permissions, AuthzError> {
        match self.cache.get(user_id, channel_id).await {
            Ok(Some(perms)) => {
                debug!("Permission cache hit");
                return Ok(perms);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Permission cache read failed"),
        }

        let (_, is_owner) = try_join!(
            self.store.channel_info(channel_id),
            self.store.is_owner(user_id)
        )?;

        let perms = if is_owner {
            Permissions::all()
        } else {
            let (roles, overrides) = try_join!(
                self.store.role_permissions(user_id),
                self.store.overrides(TargetType::Channel, channel_id)
            )?;
            compute_permissions(user_id, false, &roles, &overrides)
        };

        if let Err(e) = self.cache.set(user_id, channel_id, perms).await {
            warn!(error = %e, "Permission cache write failed");
        }

        Ok(perms)
    }

    /// Whether any bit of `permission` is granted to `user_id` in `channel_id`.
    pub async fn has_permission(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
        permission: Permissions,
    ) -> Result<bool, AuthzError> {
        Ok(self.resolve(user_id, channel_id).await?.grants(permission))
    }

    /// For each channel, whether `permission` is granted to `user_id` there.
    ///
    /// Output matches `channel_ids` in order and length. Channels that do not exist are
    /// `false`. Store and cache round trips do not grow with the number of channels.
    #[tracing::instrument(skip(self, channel_ids), fields(count = channel_ids.len()))]
    pub async fn filter_permitted(
        &self,
        user_id: Uuid,
        channel_ids: &[Uuid],
        permission: Permissions,
    ) -> Result<Vec<bool>, AuthzError> {
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = match self.cache.get_many(user_id, channel_ids).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Permission cache batch read failed");
                HashMap::new()
            }
        };

        let misses = unique_misses(channel_ids, &resolved);
        debug!(
            hits = resolved.len(),
            misses = misses.len(),
            "Permission cache lookup"
        );

        if !misses.is_empty() {
            let computed = self.compute_channels(user_id, &misses).await?;
            if !computed.is_empty() {
                if let Err(e) = self.cache.set_many(user_id, &computed).await {
                    warn!(error = %e, "Permission cache batch write failed");
                }
            }
            resolved.extend(computed);
        }

        Ok(channel_ids
            .iter()
            .map(|id| resolved.get(id).is_some_and(|p| p.grants(permission)))
            .collect())
    }

    /// For each user, whether `permission` is granted to them in `channel_id`.
    ///
    /// Element `i` equals `has_permission(user_ids[i], channel_id, permission)`.
    #[tracing::instrument(skip(self, user_ids), fields(count = user_ids.len()))]
    pub async fn filter_users_permitted(
        &self,
        user_ids: &[Uuid],
        channel_id: Uuid,
        permission: Permissions,
    ) -> Result<Vec<bool>, AuthzError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = match self.cache.get_many_users(channel_id, user_ids).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Permission cache batch read failed");
                HashMap::new()
            }
        };

        let misses = unique_misses(user_ids, &resolved);
        debug!(
            hits = resolved.len(),
            misses = misses.len(),
            "Permission cache lookup"
        );

        if !misses.is_empty() {
            let computed = self.compute_users(&misses, channel_id).await?;
            if let Err(e) = self.cache.set_many_users(channel_id, &computed).await {
                warn!(error = %e, "Permission cache batch write failed");
            }
            resolved.extend(computed);
        }

        Ok(user_ids
            .iter()
            .map(|id| resolved.get(id).is_some_and(|p| p.grants(permission)))
            .collect())
    }

    /// One user, many channels. Unknown channels are left out of the result.
    async fn compute_channels(
        &self,
        user_id: Uuid,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, AuthzError> {
        let (existing, is_owner) = try_join!(
            self.store.channel_info_many(channel_ids),
            self.store.is_owner(user_id)
        )?;

        let channel_ids: Vec<Uuid> = channel_ids
            .iter()
            .copied()
            .filter(|id| existing.contains_key(id))
            .collect();
        if channel_ids.is_empty() {
            return Ok(HashMap::new());
        }

        if is_owner {
            return Ok(channel_ids
                .into_iter()
                .map(|id| (id, Permissions::all()))
                .collect());
        }

        let (roles, mut overrides) = try_join!(
            self.store.role_permissions(user_id),
            self.store.overrides_many(TargetType::Channel, &channel_ids)
        )?;

        Ok(channel_ids
            .into_iter()
            .map(|id| {
                let channel_overrides = overrides.remove(&id).unwrap_or_default();
                (
                    id,
                    compute_permissions(user_id, false, &roles, &channel_overrides),
                )
            })
            .collect())
    }

    /// Many users, one channel. The channel's overrides are read once.
    async fn compute_users(
        &self,
        user_ids: &[Uuid],
        channel_id: Uuid,
    ) -> Result<HashMap<Uuid, Permissions>, AuthzError> {
        let (_, overrides, owner_id, mut roles) = try_join!(
            self.store.channel_info(channel_id),
            self.store.overrides(TargetType::Channel, channel_id),
            self.store.owner_id(),
            self.store.role_permissions_many(user_ids)
        )?;

        Ok(user_ids
            .iter()
            .map(|&user_id| {
                let user_roles = roles.remove(&user_id).unwrap_or_default();
                let is_owner = owner_id == Some(user_id);
                (
                    user_id,
                    compute_permissions(user_id, is_owner, &user_roles, &overrides),
                )
            })
            .collect())
    }
}
