//! Data models for the permission system.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::flags::Permissions;
use crate::error::AuthzError;

/// Server role with permissions.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[sqlx(try_from = "i64")]
    pub permissions: Permissions,
    /// Lower value means higher rank.
    pub position: i32,
    /// The implicit base role every member holds.
    pub is_everyone: bool,
    /// Display-only; irrelevant to authorization.
    pub hoist: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A role's contribution to base permissions, as the store returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize)]
pub struct RolePermission {
    pub role_id: Uuid,
    #[sqlx(try_from = "i64")]
    pub permissions: Permissions,
}

/// Member lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Pending,
    TimedOut,
}

impl MemberStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::TimedOut => "timed_out",
        }
    }
}

impl FromStr for MemberStatus {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(AuthzError::Validation(format!(
                "unknown member status: {other}"
            ))),
        }
    }
}

/// Server member and the roles assigned to them.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub user_id: Uuid,
    pub role_ids: HashSet<Uuid>,
    pub status: MemberStatus,
}

impl Member {
    /// Whether handlers should resolve permissions for this member at all.
    ///
    /// Pending and timed-out members are turned away before the resolver runs.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        matches!(self.status, MemberStatus::Active)
    }
}

/// Minimal channel metadata.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ChannelInfo {
    pub id: Uuid,
    pub name: String,
}

/// What an override is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Channel,
}

impl TargetType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
        }
    }
}

impl FromStr for TargetType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" => Ok(Self::Channel),
            other => Err(AuthzError::Validation(format!(
                "unknown override target type: {other}"
            ))),
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an override applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    Role,
    User,
}

impl PrincipalType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::User => "user",
        }
    }
}

impl FromStr for PrincipalType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "role" => Ok(Self::Role),
            "user" => Ok(Self::User),
            other => Err(AuthzError::Validation(format!(
                "unknown override principal type: {other}"
            ))),
        }
    }
}

impl fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel-scoped allow/deny override for a role or a user.
///
/// Unique per (target type, target id, principal type, principal id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionOverride {
    pub id: Uuid,
    pub target_type: TargetType,
    pub target_id: Uuid,
    pub principal_type: PrincipalType,
    pub principal_id: Uuid,
    pub allow: Permissions,
    pub deny: Permissions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PermissionOverride {
    /// Bits this row both allows and denies.
    ///
    /// Resolution clears deny before setting allow, so these bits end up allowed.
    #[must_use]
    pub fn overlap(&self) -> Permissions {
        self.allow & self.deny
    }
}

/// Raw `permission_overrides` row before enum parsing.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct OverrideRow {
    pub id: Uuid,
    pub target_type: String,
    pub target_id: Uuid,
    pub principal_type: String,
    pub principal_id: Uuid,
    pub allow_permissions: i64,
    pub deny_permissions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OverrideRow> for PermissionOverride {
    type Error = AuthzError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            target_type: row.target_type.parse()?,
            target_id: row.target_id,
            principal_type: row.principal_type.parse()?,
            principal_id: row.principal_id,
            allow: Permissions::from_db(row.allow_permissions),
            deny: Permissions::from_db(row.deny_permissions),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_override(principal_type: PrincipalType, principal_id: Uuid) -> PermissionOverride {
        PermissionOverride {
            id: Uuid::new_v4(),
            target_type: TargetType::Channel,
            target_id: Uuid::new_v4(),
            principal_type,
            principal_id,
            allow: Permissions::SEND_MESSAGES | Permissions::ATTACH_FILES,
            deny: Permissions::SEND_MESSAGES,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_overlap() {
        let row = sample_override(PrincipalType::Role, Uuid::new_v4());
        assert_eq!(row.overlap(), Permissions::SEND_MESSAGES);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("role".parse::<PrincipalType>().ok(), Some(PrincipalType::Role));
        assert_eq!("user".parse::<PrincipalType>().ok(), Some(PrincipalType::User));
        assert!("group".parse::<PrincipalType>().is_err());
        assert_eq!("channel".parse::<TargetType>().ok(), Some(TargetType::Channel));
        assert!("guild".parse::<TargetType>().is_err());
        assert_eq!(
            "timed_out".parse::<MemberStatus>().ok(),
            Some(MemberStatus::TimedOut)
        );
    }

    #[test]
    fn test_row_conversion() {
        let row = OverrideRow {
            id: Uuid::new_v4(),
            target_type: "channel".into(),
            target_id: Uuid::new_v4(),
            principal_type: "user".into(),
            principal_id: Uuid::new_v4(),
            allow_permissions: Permissions::VIEW_CHANNELS.to_db(),
            deny_permissions: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let parsed = PermissionOverride::try_from(row.clone()).unwrap();
        assert_eq!(parsed.principal_type, PrincipalType::User);
        assert_eq!(parsed.allow, Permissions::VIEW_CHANNELS);
        assert!(parsed.deny.is_empty());

        let bad = OverrideRow {
            principal_type: "bot".into(),
            ..row
        };
        assert!(PermissionOverride::try_from(bad).is_err());
    }

    #[test]
    fn test_member_eligibility() {
        let mut member = Member {
            user_id: Uuid::new_v4(),
            role_ids: HashSet::new(),
            status: MemberStatus::Active,
        };
        assert!(member.is_eligible());
        member.status = MemberStatus::Pending;
        assert!(!member.is_eligible());
        member.status = MemberStatus::TimedOut;
        assert!(!member.is_eligible());
    }
}
