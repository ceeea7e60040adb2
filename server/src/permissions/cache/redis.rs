//! Redis-backed permission cache shared by every server process.
//!
//! Layout under the configured prefix (default `canis:perm`):
//! - `{prefix}:e:{user_id}:{channel_id}` → permission bits as a decimal string, `EX ttl`
//! - `{prefix}:u:{user_id}` → ZSET of channel ids cached for the user
//! - `{prefix}:c:{channel_id}` → ZSET of user ids cached for the channel
//! - `{prefix}:users` → ZSET of user ids with any cached entry
//!
//! Index members are scored with the unix second after which their entry is gone.
//! Every write prunes members past that score, and scoped deletes remove the reverse
//! index memberships of what they drop, so index size tracks live entries. Writes and
//! deletes run as Lua scripts, one round trip each. Scripts build entry keys
//! themselves, which assumes a single Redis node (no cluster slot routing).

use std::collections::HashMap;

use async_trait::async_trait;
use fred::interfaces::LuaInterface;
use fred::prelude::*;
use tracing::debug;
use uuid::Uuid;

use super::{CacheError, PermissionCache};
use crate::permissions::flags::Permissions;

/// Write `(user, channel, bits)` triples and their index memberships.
///
/// KEYS: users index, then `entry, user index, channel index` per triple.
/// ARGV: ttl, then `user, channel, bits` per triple.
const SET_ENTRIES_SCRIPT: &str = r"
local ttl = tonumber(ARGV[1])
local now = tonumber(redis.call('TIME')[1])
local gone_at = now + ttl + 1
local n = (#KEYS - 1) / 3
for i = 0, n - 1 do
  local user = ARGV[2 + i * 3]
  local channel = ARGV[3 + i * 3]
  local user_index = KEYS[3 + i * 3]
  local channel_index = KEYS[4 + i * 3]
  redis.call('SET', KEYS[2 + i * 3], ARGV[4 + i * 3], 'EX', ttl)
  redis.call('ZADD', user_index, gone_at, channel)
  redis.call('ZREMRANGEBYSCORE', user_index, '-inf', now)
  redis.call('EXPIRE', user_index, ttl + 1)
  redis.call('ZADD', channel_index, gone_at, user)
  redis.call('ZREMRANGEBYSCORE', channel_index, '-inf', now)
  redis.call('EXPIRE', channel_index, ttl + 1)
  redis.call('ZADD', KEYS[1], gone_at, user)
end
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now)
redis.call('EXPIRE', KEYS[1], ttl + 1)
return n
";

/// Drop every entry of one user and the user's index memberships.
///
/// KEYS: users index, user index. ARGV: key prefix, user id.
const DELETE_USER_SCRIPT: &str = r"
local prefix = ARGV[1]
local user = ARGV[2]
local channels = redis.call('ZRANGE', KEYS[2], 0, -1)
for _, channel in ipairs(channels) do
  redis.call('DEL', prefix .. ':e:' .. user .. ':' .. channel)
  redis.call('ZREM', prefix .. ':c:' .. channel, user)
end
redis.call('DEL', KEYS[2])
redis.call('ZREM', KEYS[1], user)
return #channels
";

/// Drop every entry of one channel and the channel's index memberships.
///
/// KEYS: users index, channel index. ARGV: key prefix, channel id.
const DELETE_CHANNEL_SCRIPT: &str = r"
local prefix = ARGV[1]
local channel = ARGV[2]
local users = redis.call('ZRANGE', KEYS[2], 0, -1)
for _, user in ipairs(users) do
  redis.call('DEL', prefix .. ':e:' .. user .. ':' .. channel)
  local user_index = prefix .. ':u:' .. user
  redis.call('ZREM', user_index, channel)
  if redis.call('ZCARD', user_index) == 0 then
    redis.call('ZREM', KEYS[1], user)
  end
end
redis.call('DEL', KEYS[2])
return #users
";

/// Drop one entry and its index memberships.
///
/// KEYS: users index, entry, user index, channel index. ARGV: user id, channel id.
const DELETE_ENTRY_SCRIPT: &str = r"
local removed = redis.call('DEL', KEYS[2])
redis.call('ZREM', KEYS[3], ARGV[2])
redis.call('ZREM', KEYS[4], ARGV[1])
if redis.call('ZCARD', KEYS[3]) == 0 then
  redis.call('ZREM', KEYS[1], ARGV[1])
end
return removed
";

/// Drop every entry and index under the prefix.
///
/// KEYS: users index. ARGV: key prefix.
const DELETE_ALL_SCRIPT: &str = r"
local prefix = ARGV[1]
local removed = 0
local users = redis.call('ZRANGE', KEYS[1], 0, -1)
for _, user in ipairs(users) do
  local user_index = prefix .. ':u:' .. user
  local channels = redis.call('ZRANGE', user_index, 0, -1)
  for _, channel in ipairs(channels) do
    removed = removed + redis.call('DEL', prefix .. ':e:' .. user .. ':' .. channel)
    redis.call('DEL', prefix .. ':c:' .. channel)
  end
  redis.call('DEL', user_index)
end
redis.call('DEL', KEYS[1])
return removed
";

/// [`PermissionCache`] over a shared Redis instance.
#[derive(Clone)]
pub struct RedisPermissionCache {
    redis: Client,
    prefix: String,
    ttl_secs: u64,
}

impl RedisPermissionCache {
    pub fn new(redis: Client, prefix: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            // EX 0 is rejected by Redis
            ttl_secs: ttl_secs.max(1),
        }
    }

    fn entry_key(&self, user_id: Uuid, channel_id: Uuid) -> String {
        format!("{}:e:{user_id}:{channel_id}", self.prefix)
    }

    fn user_index_key(&self, user_id: Uuid) -> String {
        format!("{}:u:{user_id}", self.prefix)
    }

    fn channel_index_key(&self, channel_id: Uuid) -> String {
        format!("{}:c:{channel_id}", self.prefix)
    }

    fn users_key(&self) -> String {
        format!("{}:users", self.prefix)
    }

    fn parse_bits(raw: &str) -> Result<Permissions, CacheError> {
        raw.parse::<u64>()
            .map(Permissions::from_bits_retain)
            .map_err(|_| CacheError::Malformed(raw.to_string()))
    }

    /// Build the keys and args of [`SET_ENTRIES_SCRIPT`].
    fn set_entries_payload(
        &self,
        entries: impl IntoIterator<Item = (Uuid, Uuid, Permissions)>,
    ) -> (Vec<String>, Vec<String>) {
        let mut keys = vec![self.users_key()];
        let mut args = vec![self.ttl_secs.to_string()];
        for (user_id, channel_id, perms) in entries {
            keys.push(self.entry_key(user_id, channel_id));
            keys.push(self.user_index_key(user_id));
            keys.push(self.channel_index_key(channel_id));
            args.push(user_id.to_string());
            args.push(channel_id.to_string());
            args.push(perms.bits().to_string());
        }
        (keys, args)
    }

    async fn set_entries(
        &self,
        entries: Vec<(Uuid, Uuid, Permissions)>,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let (keys, args) = self.set_entries_payload(entries);
        let written: i64 = self.redis.eval(SET_ENTRIES_SCRIPT, keys, args).await?;
        debug!(written, "Permission cache entries written");
        Ok(())
    }

    /// MGET `keys` and pair each hit with `ids` by position.
    async fn read_entries(
        &self,
        ids: &[Uuid],
        keys: Vec<String>,
    ) -> Result<HashMap<Uuid, Permissions>, CacheError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let values: Vec<Option<String>> = self.redis.mget(keys).await?;

        let mut hits = HashMap::with_capacity(values.len());
        for (id, value) in ids.iter().zip(values) {
            if let Some(raw) = value {
                hits.insert(*id, Self::parse_bits(&raw)?);
            }
        }
        Ok(hits)
    }

    /// Run a scoped delete script against `index_key` for `id`.
    async fn delete_indexed(
        &self,
        script: &'static str,
        index_key: String,
        id: Uuid,
    ) -> Result<i64, CacheError> {
        let removed: i64 = self
            .redis
            .eval(
                script,
                vec![self.users_key(), index_key],
                vec![self.prefix.clone(), id.to_string()],
            )
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl PermissionCache for RedisPermissionCache {
    async fn get(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
    ) -> Result<Option<Permissions>, CacheError> {
        let value: Option<String> = self.redis.get(self.entry_key(user_id, channel_id)).await?;
        value.as_deref().map(Self::parse_bits).transpose()
    }

    async fn set(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
        permissions: Permissions,
    ) -> Result<(), CacheError> {
        self.set_entries(vec![(user_id, channel_id, permissions)])
            .await
    }

    async fn get_many(
        &self,
        user_id: Uuid,
        channel_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError> {
        let keys = channel_ids
            .iter()
            .map(|&channel_id| self.entry_key(user_id, channel_id))
            .collect();
        self.read_entries(channel_ids, keys).await
    }

    async fn set_many(
        &self,
        user_id: Uuid,
        entries: &HashMap<Uuid, Permissions>,
    ) -> Result<(), CacheError> {
        self.set_entries(
            entries
                .iter()
                .map(|(&channel_id, &perms)| (user_id, channel_id, perms))
                .collect(),
        )
        .await
    }

    async fn get_many_users(
        &self,
        channel_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Permissions>, CacheError> {
        let keys = user_ids
            .iter()
            .map(|&user_id| self.entry_key(user_id, channel_id))
            .collect();
        self.read_entries(user_ids, keys).await
    }

    async fn set_many_users(
        &self,
        channel_id: Uuid,
        entries: &HashMap<Uuid, Permissions>,
    ) -> Result<(), CacheError> {
        self.set_entries(
            entries
                .iter()
                .map(|(&user_id, &perms)| (user_id, channel_id, perms))
                .collect(),
        )
        .await
    }

    async fn delete_by_user(&self, user_id: Uuid) -> Result<(), CacheError> {
        let removed = self
            .delete_indexed(DELETE_USER_SCRIPT, self.user_index_key(user_id), user_id)
            .await?;
        debug!(%user_id, removed, "Permission cache entries dropped for user");
        Ok(())
    }

    async fn delete_by_channel(&self, channel_id: Uuid) -> Result<(), CacheError> {
        let removed = self
            .delete_indexed(
                DELETE_CHANNEL_SCRIPT,
                self.channel_index_key(channel_id),
                channel_id,
            )
            .await?;
        debug!(%channel_id, removed, "Permission cache entries dropped for channel");
        Ok(())
    }

    async fn delete_exact(&self, user_id: Uuid, channel_id: Uuid) -> Result<(), CacheError> {
        let _: i64 = self
            .redis
            .eval(
                DELETE_ENTRY_SCRIPT,
                vec![
                    self.users_key(),
                    self.entry_key(user_id, channel_id),
                    self.user_index_key(user_id),
                    self.channel_index_key(channel_id),
                ],
                vec![user_id.to_string(), channel_id.to_string()],
            )
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), CacheError> {
        let removed: i64 = self
            .redis
            .eval(
                DELETE_ALL_SCRIPT,
                vec![self.users_key()],
                vec![self.prefix.clone()],
            )
            .await?;
        debug!(removed, "Permission cache cleared");
        Ok(())
    }
}
