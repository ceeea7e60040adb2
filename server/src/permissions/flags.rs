//! Channel permissions using bitflags.
//!
//! Permissions are organized into categories:
//! - Visibility (bits 0-1): Seeing channels and their history
//! - Content (bits 2-7): Message and media permissions
//! - Voice (bits 8-12): Voice channel permissions
//! - Moderation (bits 13-17): Member management permissions
//! - Server Management (bits 18-22): Administrative permissions
//!
//! Bits 23-63 are reserved. They are never named here, and callers reject them with
//! [`Permissions::validate_bits`] before anything reaches storage.

use bitflags::bitflags;

use crate::error::AuthzError;

bitflags! {
    /// Effective permissions represented as a 64-bit bitfield.
    ///
    /// Stored as BIGINT in PostgreSQL and as a decimal string in the cache.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    #[serde(transparent)]
    pub struct Permissions: u64 {
        // === Visibility (bits 0-1) ===
        /// Permission to see a channel in listings and open it
        const VIEW_CHANNELS       = 1 << 0;
        /// Permission to read messages sent before joining the channel view
        const READ_HISTORY        = 1 << 1;

        // === Content (bits 2-7) ===
        /// Permission to send text messages in channels
        const SEND_MESSAGES       = 1 << 2;
        /// Permission to embed links in messages (auto-preview)
        const EMBED_LINKS         = 1 << 3;
        /// Permission to attach files to messages
        const ATTACH_FILES        = 1 << 4;
        /// Permission to add reactions to messages
        const ADD_REACTIONS       = 1 << 5;
        /// Permission to mention @everyone and @here
        const MENTION_EVERYONE    = 1 << 6;
        /// Permission to delete and pin messages from other members
        const MANAGE_MESSAGES     = 1 << 7;

        // === Voice (bits 8-12) ===
        /// Permission to connect to voice channels
        const VOICE_CONNECT       = 1 << 8;
        /// Permission to speak in voice channels
        const VOICE_SPEAK         = 1 << 9;
        /// Permission to start screen sharing in voice channels
        const SCREEN_SHARE        = 1 << 10;
        /// Permission to mute other members in voice channels
        const VOICE_MUTE_OTHERS   = 1 << 11;
        /// Permission to move members between voice channels
        const VOICE_MOVE_MEMBERS  = 1 << 12;

        // === Moderation (bits 13-17) ===
        /// Permission to timeout members (temporary mute)
        const TIMEOUT_MEMBERS     = 1 << 13;
        /// Permission to kick members from the server
        const KICK_MEMBERS        = 1 << 14;
        /// Permission to ban members from the server
        const BAN_MEMBERS         = 1 << 15;
        /// Permission to change other members' nicknames
        const MANAGE_NICKNAMES    = 1 << 16;
        /// Permission to view the audit log
        const VIEW_AUDIT_LOG      = 1 << 17;

        // === Server Management (bits 18-22) ===
        /// Permission to create, edit, and delete channels and their overrides
        const MANAGE_CHANNELS     = 1 << 18;
        /// Permission to create, edit, delete, and assign roles
        const MANAGE_ROLES        = 1 << 19;
        /// Permission to modify server settings
        const MANAGE_SERVER       = 1 << 20;
        /// Permission to create invite links
        const CREATE_INVITE       = 1 << 21;
        /// Permission to manage (revoke) invite links
        const MANAGE_INVITES      = 1 << 22;
    }
}

impl Permissions {
    // === Preset Combinations ===

    /// Default permissions for the @everyone role.
    pub const EVERYONE_DEFAULT: Self = Self::VIEW_CHANNELS
        .union(Self::READ_HISTORY)
        .union(Self::SEND_MESSAGES)
        .union(Self::EMBED_LINKS)
        .union(Self::ATTACH_FILES)
        .union(Self::ADD_REACTIONS)
        .union(Self::VOICE_CONNECT)
        .union(Self::VOICE_SPEAK)
        .union(Self::CREATE_INVITE);

    // === Database Conversion ===

    /// Create permissions from a database BIGINT value.
    ///
    /// The i64 bit pattern is reinterpreted as u64 and kept as-is, including bits this
    /// crate does not name. Stored masks stay opaque; range checks happen before writes.
    #[must_use]
    pub const fn from_db(value: i64) -> Self {
        Self::from_bits_retain(value as u64)
    }

    /// Convert permissions to a database BIGINT value.
    #[must_use]
    pub const fn to_db(self) -> i64 {
        self.bits() as i64
    }

    // === Validation ===

    /// Validate a raw bitmask received from a client.
    ///
    /// Fails with [`AuthzError::Validation`] when any reserved bit is set.
    pub fn validate_bits(bits: u64) -> Result<Self, AuthzError> {
        Self::from_bits(bits).ok_or_else(|| {
            AuthzError::Validation(format!(
                "reserved permission bits set: {:#x}",
                bits & !Self::all().bits()
            ))
        })
    }

    // === Permission Checking ===

    /// Check if this permission set includes all of the specified permission(s).
    ///
    /// # Examples
    ///
    /// ```
    /// use vc_authz::permissions::Permissions;
    ///
    /// let perms = Permissions::SEND_MESSAGES | Permissions::VOICE_CONNECT;
    /// assert!(perms.has(Permissions::SEND_MESSAGES));
    /// assert!(!perms.has(Permissions::BAN_MEMBERS));
    /// ```
    #[must_use]
    pub const fn has(self, permission: Self) -> bool {
        self.contains(permission)
    }

    /// Check whether any bit of `permission` is granted.
    ///
    /// This is the predicate behind `has_permission` and the filter queries. An empty
    /// `permission` is never granted.
    #[must_use]
    pub const fn grants(self, permission: Self) -> bool {
        self.intersects(permission)
    }

    /// Apply one override layer: clear `deny`, then set `allow`.
    #[must_use]
    pub const fn apply_layer(self, allow: Self, deny: Self) -> Self {
        self.difference(deny).union(allow)
    }

    /// Look up a single permission by its flag name, ignoring case (`send_messages`).
    ///
    /// Used by the inspection CLI. The generated [`Permissions::from_name`] is exact.
    pub fn from_flag_name(name: &str) -> Option<Self> {
        Self::from_name(&name.to_ascii_uppercase())
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<i64> for Permissions {
    fn from(value: i64) -> Self {
        Self::from_db(value)
    }
}
