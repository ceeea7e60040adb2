//! Storage seams for the resolver and the override write path.
//!
//! Postgres implementations live in [`super::queries`]. Every method returns
//! [`AuthzError`]; failures are passed through to callers without retries.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use super::flags::Permissions;
use super::models::{ChannelInfo, PermissionOverride, PrincipalType, RolePermission, TargetType};
use crate::error::AuthzError;

/// Read adapter over role assignments, channels, overrides and ownership.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Role entries for a user. Always includes the @everyone role.
    async fn role_permissions(&self, user_id: Uuid) -> Result<Vec<RolePermission>, AuthzError>;

    /// Role entries for many users in one round trip.
    ///
    /// Every requested user has an entry, with at least @everyone.
    async fn role_permissions_many(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<RolePermission>>, AuthzError>;

    /// Channel metadata. Fails with [`AuthzError::ChannelNotFound`] for unknown ids.
    async fn channel_info(&self, channel_id: Uuid) -> Result<ChannelInfo, AuthzError>;

    /// Metadata for the channels that exist among `channel_ids`.
    async fn channel_info_many(
        &self,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ChannelInfo>, AuthzError>;

    /// All overrides attached to a target.
    async fn overrides(
        &self,
        target_type: TargetType,
        target_id: Uuid,
    ) -> Result<Vec<PermissionOverride>, AuthzError>;

    /// Overrides for many targets, keyed by target id. Targets without rows may be absent.
    async fn overrides_many(
        &self,
        target_type: TargetType,
        target_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<PermissionOverride>>, AuthzError>;

    /// The server owner, if one is set.
    async fn owner_id(&self) -> Result<Option<Uuid>, AuthzError>;

    async fn is_owner(&self, user_id: Uuid) -> Result<bool, AuthzError> {
        Ok(self.owner_id().await? == Some(user_id))
    }
}

/// Write path for channel-scoped overrides.
///
/// `allow`/`deny` are opaque here; range checks belong to the caller.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Upsert the override for (target, principal) and return the stored row.
    async fn set(
        &self,
        target_type: TargetType,
        target_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<PermissionOverride, AuthzError>;

    /// Remove the override for (target, principal).
    ///
    /// Fails with [`AuthzError::OverrideNotFound`] when no row matches.
    async fn delete(
        &self,
        target_type: TargetType,
        target_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> Result<(), AuthzError>;

    /// All overrides attached to a target.
    async fn list(
        &self,
        target_type: TargetType,
        target_id: Uuid,
    ) -> Result<Vec<PermissionOverride>, AuthzError>;
}
