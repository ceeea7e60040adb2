//! Authorization service wiring.
//!
//! [`Authz`] is built once per process and passed to handlers. It owns the storage
//! adapters, the cache, the resolver and the publisher, and runs the
//! persist-then-invalidate flow for override mutations.
//!
//! Override mutations invalidate inline so the writer sees the change on its next read.
//! Other domain changes go through the bounded invalidation queue once one is attached
//! with [`Authz::with_invalidation_queue`].

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{CacheBackend, Config};
use crate::db;
use crate::error::AuthzError;
use crate::permissions::{
    Invalidation, InvalidationQueue, InvalidationSender, MemoryPermissionCache, OverrideStore,
    PermissionCache, PermissionChange, PermissionOverride, PermissionStore, Permissions,
    PgOverrideStore, PgPermissionStore, PrincipalType, Publisher, RedisPermissionCache,
    Resolver, TargetType,
};

/// Shared authorization service.
#[derive(Clone)]
pub struct Authz {
    store: Arc<dyn PermissionStore>,
    overrides: Arc<dyn OverrideStore>,
    cache: Arc<dyn PermissionCache>,
    resolver: Resolver,
    publisher: Publisher,
    invalidations: Option<InvalidationSender>,
}

impl Authz {
    pub fn new(
        store: Arc<dyn PermissionStore>,
        overrides: Arc<dyn OverrideStore>,
        cache: Arc<dyn PermissionCache>,
    ) -> Self {
        Self {
            resolver: Resolver::new(store.clone(), cache.clone()),
            publisher: Publisher::new(cache.clone()),
            store,
            overrides,
            cache,
            invalidations: None,
        }
    }

    /// Build on an existing pool with the Postgres adapters.
    pub fn with_pool(pool: PgPool, cache: Arc<dyn PermissionCache>) -> Self {
        Self::new(
            Arc::new(PgPermissionStore::new(pool.clone())),
            Arc::new(PgOverrideStore::new(pool)),
            cache,
        )
    }

    /// Connect to PostgreSQL and the configured cache backend, with the invalidation
    /// queue sized from the config.
    ///
    /// The handle finishes once every clone of the service is dropped and the queue is
    /// drained; await it on shutdown.
    pub async fn connect(config: &Config) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let pool = db::create_pool(&config.database_url).await?;
        let cache = Self::connect_cache(config).await?;
        Ok(Self::with_pool(pool, cache)
            .with_invalidation_queue(config.invalidation_queue_capacity))
    }

    /// Build the configured cache backend.
    pub async fn connect_cache(config: &Config) -> anyhow::Result<Arc<dyn PermissionCache>> {
        let cache: Arc<dyn PermissionCache> = match config.cache_backend {
            CacheBackend::Redis => {
                let redis = db::create_redis_client(&config.redis_url).await?;
                Arc::new(RedisPermissionCache::new(
                    redis,
                    config.cache_prefix.clone(),
                    config.cache_ttl_secs,
                ))
            }
            CacheBackend::Memory => {
                warn!("Using in-process permission cache; invalidations stay local");
                Arc::new(MemoryPermissionCache::new(Duration::from_secs(
                    config.cache_ttl_secs,
                )))
            }
        };
        info!(backend = ?config.cache_backend, ttl_secs = config.cache_ttl_secs, "Permission cache ready");
        Ok(cache)
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.store
    }

    pub fn overrides(&self) -> &Arc<dyn OverrideStore> {
        &self.overrides
    }

    pub fn cache(&self) -> &Arc<dyn PermissionCache> {
        &self.cache
    }

    /// Start the background invalidation worker on this service's cache.
    ///
    /// Drop every returned sender, then await the handle to shut it down.
    pub fn start_invalidation_queue(
        &self,
        capacity: usize,
    ) -> (InvalidationSender, JoinHandle<()>) {
        InvalidationQueue::start(self.publisher.clone(), capacity)
    }

    /// Route [`Authz::apply_change`] and [`Authz::invalidate`] through a queue worker.
    pub fn with_invalidation_queue(mut self, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, handle) = self.start_invalidation_queue(capacity);
        info!(capacity, "Invalidation queue started");
        self.invalidations = Some(sender);
        (self, handle)
    }

    /// Resolve and require any bit of `permission`.
    ///
    /// Returns the full resolved set so callers can make follow-up checks without
    /// resolving again.
    pub async fn require_permission(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
        permission: Permissions,
    ) -> Result<Permissions, AuthzError> {
        let perms = self.resolver.resolve(user_id, channel_id).await?;
        if !perms.grants(permission) {
            return Err(AuthzError::MissingPermission(permission));
        }
        Ok(perms)
    }

    /// Upsert a channel override, then invalidate the channel.
    #[tracing::instrument(skip(self))]
    pub async fn set_override(
        &self,
        channel_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<PermissionOverride, AuthzError> {
        Permissions::validate_bits(allow.bits())?;
        Permissions::validate_bits(deny.bits())?;

        let ovr = self
            .overrides
            .set(
                TargetType::Channel,
                channel_id,
                principal_type,
                principal_id,
                allow,
                deny,
            )
            .await?;

        let overlap = ovr.overlap();
        if !overlap.is_empty() {
            warn!(
                override_id = %ovr.id,
                overlap = overlap.bits(),
                "Override both allows and denies the same bits; allow takes effect"
            );
        }

        self.publisher.invalidate_channel(channel_id).await;
        Ok(ovr)
    }

    /// Remove a channel override, then invalidate the channel.
    #[tracing::instrument(skip(self))]
    pub async fn delete_override(
        &self,
        channel_id: Uuid,
        principal_type: PrincipalType,
        principal_id: Uuid,
    ) -> Result<(), AuthzError> {
        self.overrides
            .delete(TargetType::Channel, channel_id, principal_type, principal_id)
            .await?;
        self.publisher.invalidate_channel(channel_id).await;
        Ok(())
    }

    /// Overrides attached to a channel, oldest first.
    pub async fn list_overrides(
        &self,
        channel_id: Uuid,
    ) -> Result<Vec<PermissionOverride>, AuthzError> {
        self.overrides.list(TargetType::Channel, channel_id).await
    }

    /// Invalidate whatever a persisted mutation affects.
    ///
    /// Enqueued when a queue is attached, applied inline otherwise.
    pub async fn apply_change(&self, change: PermissionChange) {
        match &self.invalidations {
            Some(sender) => {
                sender.publish_change(change);
            }
            None => self.publisher.apply_change(change).await,
        }
    }

    /// Drop one cache scope, through the queue when one is attached.
    pub async fn invalidate(&self, invalidation: Invalidation) {
        match &self.invalidations {
            Some(sender) => {
                sender.publish(invalidation);
            }
            None => self.publisher.apply(invalidation).await,
        }
    }
}
