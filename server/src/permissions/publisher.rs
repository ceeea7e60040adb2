//! Cache invalidation after permission-affecting changes.
//!
//! [`Publisher`] deletes cache entries directly. [`InvalidationQueue`] puts a bounded
//! channel and a single worker in front of it so request paths never wait on the cache.
//! Both swallow cache failures after logging them; stale entries then live until TTL.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cache::PermissionCache;

/// Max invalidations drained per worker iteration.
const BATCH_CAPACITY: usize = 64;

/// Scope of cached entries to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invalidation {
    All,
    Channel(Uuid),
    User(Uuid),
    Entry { user_id: Uuid, channel_id: Uuid },
}

/// A domain change that can alter resolved permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionChange {
    /// A role was created, deleted, reordered, or had its bits edited.
    RoleStructureChanged,
    /// An override on the channel was set or removed.
    ChannelOverridesChanged { channel_id: Uuid },
    /// Roles were granted to or revoked from the member.
    MemberRolesChanged { user_id: Uuid },
    MemberBanned { user_id: Uuid },
    MemberTimedOut { user_id: Uuid },
    OwnershipTransferred { from: Uuid, to: Uuid },
}

impl PermissionChange {
    /// Cache scopes this change invalidates.
    pub fn invalidations(self) -> Vec<Invalidation> {
        match self {
            Self::RoleStructureChanged => vec![Invalidation::All],
            Self::ChannelOverridesChanged { channel_id } => {
                vec![Invalidation::Channel(channel_id)]
            }
            Self::MemberRolesChanged { user_id }
            | Self::MemberBanned { user_id }
            | Self::MemberTimedOut { user_id } => vec![Invalidation::User(user_id)],
            Self::OwnershipTransferred { from, to } => {
                vec![Invalidation::User(from), Invalidation::User(to)]
            }
        }
    }
}

/// Deletes cached permissions. Never fails from the caller's point of view.
#[derive(Clone)]
pub struct Publisher {
    cache: Arc<dyn PermissionCache>,
}

impl Publisher {
    pub fn new(cache: Arc<dyn PermissionCache>) -> Self {
        Self { cache }
    }

    /// Drop every cached entry.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_all(&self) {
        match self.cache.delete_all().await {
            Ok(()) => debug!("Invalidated all cached permissions"),
            Err(e) => warn!(error = %e, "Failed to invalidate all cached permissions"),
        }
    }

    /// Drop every cached entry for the channel, across all users.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_channel(&self, channel_id: Uuid) {
        if let Err(e) = self.cache.delete_by_channel(channel_id).await {
            warn!(error = %e, "Failed to invalidate channel permissions");
        }
    }

    /// Drop every cached entry for the user, across all channels.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_user(&self, user_id: Uuid) {
        if let Err(e) = self.cache.delete_by_user(user_id).await {
            warn!(error = %e, "Failed to invalidate user permissions");
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn invalidate_entry(&self, user_id: Uuid, channel_id: Uuid) {
        if let Err(e) = self.cache.delete_exact(user_id, channel_id).await {
            warn!(error = %e, "Failed to invalidate cached permission entry");
        }
    }

    pub async fn apply(&self, invalidation: Invalidation) {
        match invalidation {
            Invalidation::All => self.invalidate_all().await,
            Invalidation::Channel(channel_id) => self.invalidate_channel(channel_id).await,
            Invalidation::User(user_id) => self.invalidate_user(user_id).await,
            Invalidation::Entry {
                user_id,
                channel_id,
            } => self.invalidate_entry(user_id, channel_id).await,
        }
    }

    /// Apply every invalidation a change implies.
    pub async fn apply_change(&self, change: PermissionChange) {
        for invalidation in change.invalidations() {
            self.apply(invalidation).await;
        }
    }
}

/// Reduce a drained batch to the scopes that still matter.
///
/// `All` subsumes everything. A user or channel scope subsumes its exact entries.
/// Duplicates collapse, first occurrence order is kept.
pub fn coalesce(batch: &[Invalidation]) -> Vec<Invalidation> {
    if batch.contains(&Invalidation::All) {
        return vec![Invalidation::All];
    }

    let users: HashSet<Uuid> = batch
        .iter()
        .filter_map(|i| match i {
            Invalidation::User(id) => Some(*id),
            _ => None,
        })
        .collect();
    let channels: HashSet<Uuid> = batch
        .iter()
        .filter_map(|i| match i {
            Invalidation::Channel(id) => Some(*id),
            _ => None,
        })
        .collect();

    let mut seen = HashSet::with_capacity(batch.len());
    batch
        .iter()
        .copied()
        .filter(|i| match i {
            Invalidation::Entry {
                user_id,
                channel_id,
            } => !users.contains(user_id) && !channels.contains(channel_id),
            _ => true,
        })
        .filter(|i| seen.insert(*i))
        .collect()
}

/// Handle for enqueueing invalidations onto the worker.
#[derive(Clone)]
pub struct InvalidationSender {
    tx: mpsc::Sender<Invalidation>,
}

impl InvalidationSender {
    /// Enqueue without waiting. Returns false when the invalidation was dropped.
    pub fn publish(&self, invalidation: Invalidation) -> bool {
        match self.tx.try_send(invalidation) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                warn!(?dropped, "Invalidation queue full, dropping");
                false
            }
            Err(TrySendError::Closed(dropped)) => {
                warn!(?dropped, "Invalidation worker stopped, dropping");
                false
            }
        }
    }

    /// Enqueue every invalidation a change implies.
    pub fn publish_change(&self, change: PermissionChange) -> bool {
        change
            .invalidations()
            .into_iter()
            .fold(true, |ok, invalidation| self.publish(invalidation) && ok)
    }
}

/// Bounded invalidation queue drained by one worker task.
pub struct InvalidationQueue;

impl InvalidationQueue {
    /// Spawn the worker. It exits once every sender is dropped and the queue is drained.
    pub fn start(publisher: Publisher, capacity: usize) -> (InvalidationSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(BATCH_CAPACITY);
            loop {
                batch.clear();
                if rx.recv_many(&mut batch, BATCH_CAPACITY).await == 0 {
                    break;
                }
                let pending = coalesce(&batch);
                debug!(
                    received = batch.len(),
                    applied = pending.len(),
                    "Draining invalidation queue"
                );
                for invalidation in pending {
                    publisher.apply(invalidation).await;
                }
            }
            debug!("Invalidation worker stopped");
        });

        (InvalidationSender { tx }, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_mapping() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            PermissionChange::RoleStructureChanged.invalidations(),
            vec![Invalidation::All]
        );
        assert_eq!(
            PermissionChange::ChannelOverridesChanged { channel_id: a }.invalidations(),
            vec![Invalidation::Channel(a)]
        );
        assert_eq!(
            PermissionChange::MemberBanned { user_id: a }.invalidations(),
            vec![Invalidation::User(a)]
        );
        assert_eq!(
            PermissionChange::OwnershipTransferred { from: a, to: b }.invalidations(),
            vec![Invalidation::User(a), Invalidation::User(b)]
        );
    }

    #[test]
    fn test_coalesce_all_subsumes_batch() {
        let batch = [
            Invalidation::User(Uuid::new_v4()),
            Invalidation::All,
            Invalidation::Channel(Uuid::new_v4()),
        ];
        assert_eq!(coalesce(&batch), vec![Invalidation::All]);
    }

    #[test]
    fn test_coalesce_dedups_and_drops_covered_entries() {
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        let batch = [
            Invalidation::Entry {
                user_id: u1,
                channel_id: c2,
            },
            Invalidation::User(u1),
            Invalidation::Channel(c1),
            Invalidation::User(u1),
            Invalidation::Entry {
                user_id: u2,
                channel_id: c1,
            },
            Invalidation::Entry {
                user_id: u2,
                channel_id: c2,
            },
        ];

        assert_eq!(
            coalesce(&batch),
            vec![
                Invalidation::User(u1),
                Invalidation::Channel(c1),
                Invalidation::Entry {
                    user_id: u2,
                    channel_id: c2,
                },
            ]
        );
    }

    #[test]
    fn test_coalesce_empty() {
        assert!(coalesce(&[]).is_empty());
    }
}
