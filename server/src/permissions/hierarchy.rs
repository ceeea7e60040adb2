//! Role hierarchy checks for role and member mutations.
//!
//! Positions are compared as fetched from the store; nothing here consults the
//! resolver. Lower position number = higher rank, and ties never permit an action.

use thiserror::Error;

use super::flags::Permissions;
use super::models::Role;

/// Hierarchy violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("Missing permission: {0:?}")]
    MissingPermission(Permissions),

    #[error("Cannot act on position {target_position} (your position: {actor_position})")]
    Outranked {
        actor_position: i32,
        target_position: i32,
    },

    #[error("The @everyone role cannot be assigned, removed, renamed, or deleted")]
    EveryoneRoleImmutable,

    #[error("Cannot grant permissions you don't have: {0:?}")]
    CannotEscalate(Permissions),

    #[error("Cannot moderate the server owner")]
    CannotModerateOwner,
}

/// Whether a caller at `caller_position` may act on a target at `target_position`.
///
/// The target must rank strictly lower than the caller.
#[must_use]
pub const fn can_act(caller_position: i32, target_position: i32) -> bool {
    target_position > caller_position
}

/// Best (numerically lowest) position among the caller's roles, ignoring @everyone.
///
/// `None` when the caller holds no explicit role.
pub fn highest_position<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Option<i32> {
    roles
        .into_iter()
        .filter(|r| !r.is_everyone)
        .map(|r| r.position)
        .min()
}

/// Gate assign/remove/rename/delete of `target` by a caller at `actor_position`.
///
/// A caller with no explicit role (`None`) outranks nothing.
pub const fn ensure_role_target(
    actor_position: Option<i32>,
    target: &Role,
) -> Result<(), HierarchyError> {
    if target.is_everyone {
        return Err(HierarchyError::EveryoneRoleImmutable);
    }

    match actor_position {
        Some(actor_position) if can_act(actor_position, target.position) => Ok(()),
        Some(actor_position) => Err(HierarchyError::Outranked {
            actor_position,
            target_position: target.position,
        }),
        None => Err(HierarchyError::Outranked {
            actor_position: i32::MAX,
            target_position: target.position,
        }),
    }
}

/// Check if a caller can edit a target role's permissions.
///
/// Rules:
/// 1. Must have `MANAGE_ROLES`
/// 2. Target must rank strictly below the caller
/// 3. Cannot grant permissions the caller lacks
///
/// Editing @everyone's permission bits is allowed; only its identity is immutable.
pub fn can_manage_role(
    actor_permissions: Permissions,
    actor_position: i32,
    target: &Role,
    new_permissions: Option<Permissions>,
) -> Result<(), HierarchyError> {
    if !actor_permissions.has(Permissions::MANAGE_ROLES) {
        return Err(HierarchyError::MissingPermission(Permissions::MANAGE_ROLES));
    }

    if !target.is_everyone && !can_act(actor_position, target.position) {
        return Err(HierarchyError::Outranked {
            actor_position,
            target_position: target.position,
        });
    }

    if let Some(new_perms) = new_permissions {
        let escalation = new_perms & !actor_permissions;
        if !escalation.is_empty() {
            return Err(HierarchyError::CannotEscalate(escalation));
        }
    }

    Ok(())
}

/// Check if a caller can moderate (kick, ban, timeout) a target member.
pub const fn can_moderate_member(
    actor_position: i32,
    target_position: i32,
    target_is_owner: bool,
) -> Result<(), HierarchyError> {
    if target_is_owner {
        return Err(HierarchyError::CannotModerateOwner);
    }

    if !can_act(actor_position, target_position) {
        return Err(HierarchyError::Outranked {
            actor_position,
            target_position,
        });
    }

    Ok(())
}
