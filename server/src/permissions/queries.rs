//! PostgreSQL adapters for the permission stores.
//!
//! Expected tables:
//! - `roles (id, name, permissions BIGINT, position, is_everyone, hoist, created_at, updated_at)`
//! - `member_roles (user_id, role_id)`
//! - `members (user_id, status)`
//! - `channels (id, name)`
//! - `permission_overrides (id, target_type, target_id, principal_type, principal_id,
//!   allow_permissions BIGINT, deny_permissions BIGINT, created_at, updated_at)` with a
//!   unique key on `(target_type, target_id, principal_type, principal_id)`
//! - `server_settings (owner_id)`, a single row

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::flags::Permissions;
use super::models::{
    ChannelInfo, Member, MemberStatus, OverrideRow, PermissionOverride, PrincipalType, Role,
    RolePermission, TargetType,
};
use super::store::{OverrideStore, PermissionStore};
use crate::error::AuthzError;

const OVERRIDE_COLUMNS: &str = "id, target_type, target_id, principal_type, principal_id, \
     allow_permissions, deny_permissions, created_at, updated_at";

fn parse_overrides(rows: Vec<OverrideRow>) -> Result<Vec<PermissionOverride>, AuthzError> {
    rows.into_iter().map(PermissionOverride::try_from).collect()
}

// ============================================================================
// Read adapter
// ============================================================================

/// [`PermissionStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgPermissionStore {
    pool: PgPool,
}

impl PgPermissionStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the explicit roles of a member, ordered by position (ascending).
    ///
    /// Feed this to [`super::hierarchy::highest_position`] before role mutations.
    #[tracing::instrument(skip(self))]
    pub async fn member_roles(&self, user_id: Uuid) -> Result<Vec<Role>, AuthzError> {
        let roles = sqlx::query_as::<_, Role>(
            r"
            SELECT r.id, r.name, r.permissions, r.position, r.is_everyone, r.hoist,
                   r.created_at, r.updated_at
            FROM roles r
            INNER JOIN member_roles mr ON mr.role_id = r.id
            WHERE mr.user_id = $1
            ORDER BY r.position ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles)
    }

    /// Get a member with its assigned role ids.
    #[tracing::instrument(skip(self))]
    pub async fn member(&self, user_id: Uuid) -> Result<Option<Member>, AuthzError> {
        let row: Option<(String, Vec<Uuid>)> = sqlx::query_as(
            r"
            SELECT m.status,
                   COALESCE(ARRAY_AGG(mr.role_id) FILTER (WHERE mr.role_id IS NOT NULL), '{}')
            FROM members m
            LEFT JOIN member_roles mr ON mr.user_id = m.user_id
            WHERE m.user_id = $1
            GROUP BY m.status
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((status, role_ids)) = row else {
            return Ok(None);
        };

        Ok(Some(Member {
            user_id,
            role_ids: role_ids.into_iter().collect(),
            status: status.parse::<MemberStatus>()?,
        }))
    }
}

#[async_trait]
impl PermissionStore for PgPermissionStore {
    #[tracing::instrument(skip(self))]
    async fn role_permissions(&self, user_id: Uuid) -> Result<Vec<RolePermission>, AuthzError> {
        let entries = sqlx::query_as::<_, RolePermission>(
            r"
            SELECT r.id AS role_id, r.permissions
            FROM roles r
            WHERE r.is_everyone
               OR r.id IN (SELECT role_id FROM member_roles WHERE user_id = $1)
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    #[tracing::instrument(skip(self, user_ids), fields(count = user_ids.len()))]
    async fn role_permissions_many(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<RolePermission>>, AuthzError> {
        let rows: Vec<(Uuid, Uuid, i64)> = sqlx::query_as(
            r"
            SELECT u.user_id, r.id, r.permissions
            FROM UNNEST($1::uuid[]) AS u(user_id)
            INNER JOIN roles r
                ON r.is_everyone
                OR EXISTS (
                    SELECT 1 FROM member_roles mr
                    WHERE mr.user_id = u.user_id AND mr.role_id = r.id
                )
            ",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_user: HashMap<Uuid, Vec<RolePermission>> =
            user_ids.iter().map(|id| (*id, Vec::new())).collect();
        for (user_id, role_id, permissions) in rows {
            by_user.entry(user_id).or_default().push(RolePermission {
                role_id,
                permissions: Permissions::from_db(permissions),
            });
        }

        Ok(by_user)
    }

    #[tracing::instrument(skip(self))]
    async fn channel_info(&self, channel_id: Uuid) -> Result<ChannelInfo, AuthzError> {
        sqlx::query_as::<_, ChannelInfo>("SELECT id, name FROM channels WHERE id = $1")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthzError::ChannelNotFound(channel_id))
    }

    #[tracing::instrument(skip(self, channel_ids), fields(count = channel_ids.len()))]
    async fn channel_info_many(
        &self,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ChannelInfo>, AuthzError> {
        let channels =
            sqlx::query_as::<_, ChannelInfo>("SELECT id, name FROM channels WHERE id = ANY($1)")
                .bind(channel_ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(channels.into_iter().map(|c| (c.id, c)).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn overrides(
        &self,
        target_type: TargetType,
        target_id: Uuid,
    ) -> Result<Vec<PermissionOverride>, AuthzError> {
        let rows = sqlx::query_as::<_, OverrideRow>(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM permission_overrides \
             WHERE target_type = $1 AND target_id = $2"
        ))
        .bind(target_type.as_str())
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        parse_overrides(rows)
    }

    #[tracing::instrument(skip(self, target_ids), fields(count = target_ids.len()))]
    async fn overrides_many(
        &self,
        target_type: TargetType,
        target_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<PermissionOverride>>, AuthzError> {
        let rows = sqlx::query_as::<_, OverrideRow>(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM permission_overrides \
             WHERE target_type = $1 AND target_id = ANY($2)"
        ))
        .bind(target_type.as_str())
        .bind(target_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_target: HashMap<Uuid, Vec<PermissionOverride>> = HashMap::new();
        for ovr in parse_overrides(rows)? {
            by_target.entry(ovr.target_id).or_default().push(ovr);
        }

        Ok(by_target)
    }

    #[tracing::instrument(skip(self))]
    async fn owner_id(&self) -> Result<Option<Uuid>, AuthzError> {
        let row: Option<(Option<Uuid>,)> =
            sqlx::query_as("SELECT owner_id FROM server_settings LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(owner,)| owner))
    }

    #[tracing::instrument(skip(self))]
    async fn is_owner(&self, user_id: Uuid) -> Result<bool, AuthzError> {
        let result: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM server_settings WHERE owner_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(result.0)
    }
}

// ============================================================================
// Override write path
// ============================================================================

/// [`OverrideStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgOverrideStore {
    pool: PgPool,
}

impl PgOverrideStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OverrideStore for PgOverrideStore {
    /// Uses ON CONFLICT UPDATE so the row id and `created_at` survive updates.
    #[tracing::instrument(skip(self))]
    async fn set(
        &self,
        target_type: TargetType,
        target_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<PermissionOverride, AuthzError> {
        let row = sqlx::query_as::<_, OverrideRow>(&format!(
            r"
            INSERT INTO permission_overrides
                (id, target_type, target_id, principal_type, principal_id,
                 allow_permissions, deny_permissions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (target_type, target_id, principal_type, principal_id) DO UPDATE
            SET allow_permissions = EXCLUDED.allow_permissions,
                deny_permissions = EXCLUDED.deny_permissions,
                updated_at = NOW()
            RETURNING {OVERRIDE_COLUMNS}
            "
        ))
        .bind(Uuid::now_v7())
        .bind(target_type.as_str())
        .bind(target_id)
        .bind(principal_type.as_str())
        .bind(principal_id)
        .bind(allow.to_db())
        .bind(deny.to_db())
        .fetch_one(&self.pool)
        .await?;

        PermissionOverride::try_from(row)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(
        &self,
        target_type: TargetType,
        target_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> Result<(), AuthzError> {
        let result = sqlx::query(
            r"
            DELETE FROM permission_overrides
            WHERE target_type = $1
              AND target_id = $2
              AND principal_type = $3
              AND principal_id = $4
            ",
        )
        .bind(target_type.as_str())
        .bind(target_id)
        .bind(principal_type.as_str())
        .bind(principal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthzError::OverrideNotFound);
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list(
        &self,
        target_type: TargetType,
        target_id: Uuid,
    ) -> Result<Vec<PermissionOverride>, AuthzError> {
        let rows = sqlx::query_as::<_, OverrideRow>(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM permission_overrides \
             WHERE target_type = $1 AND target_id = $2 \
             ORDER BY created_at ASC"
        ))
        .bind(target_type.as_str())
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        parse_overrides(rows)
    }
}
