//! In-process invalidation fan-out.
//!
//! Writers that commit a tenant change publish an [`InvalidationEvent`]; every
//! cache attached to the channel applies it. External sources (such as the
//! PostgreSQL `NOTIFY` listener) publish into the same channel.

use serde::{Deserialize, Serialize};
use tenantry_core::{Revision, TenantId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::resolver::TenantResolutionCache;
use crate::directory::TenantDirectory;

/// Default number of buffered events per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A committed change to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub tenant_id: TenantId,
    /// Revision the change was committed at, when the writer knows it.
    pub revision: Option<Revision>,
}

impl InvalidationEvent {
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            revision: None,
        }
    }

    pub fn at(tenant_id: TenantId, revision: Revision) -> Self {
        Self {
            tenant_id,
            revision: Some(revision),
        }
    }

    /// Apply this event to a cache. Returns whether an entry was removed.
    pub fn apply<D: TenantDirectory>(&self, cache: &TenantResolutionCache<D>) -> bool {
        match self.revision {
            Some(revision) => cache.invalidate_at(&self.tenant_id, revision),
            None => cache.invalidate(&self.tenant_id),
        }
    }
}

/// Message carried by an [`InvalidationChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Tenant(InvalidationEvent),
    /// Drop everything, used when a publisher may have missed events.
    All,
}

impl Invalidation {
    /// Apply this message to a cache. Returns the number of entries removed.
    pub fn apply<D: TenantDirectory>(&self, cache: &TenantResolutionCache<D>) -> usize {
        match self {
            Invalidation::Tenant(event) => usize::from(event.apply(cache)),
            Invalidation::All => cache.clear(),
        }
    }
}

/// Broadcast channel carrying invalidation events.
#[derive(Debug, Clone)]
pub struct InvalidationChannel {
    tx: broadcast::Sender<Invalidation>,
}

impl Default for InvalidationChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl InvalidationChannel {
    /// Create a channel buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a tenant event to every subscriber. Returns the number of
    /// receivers.
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        self.send(Invalidation::Tenant(event))
    }

    /// Tell every subscriber to drop all entries.
    pub fn publish_all(&self) -> usize {
        self.send(Invalidation::All)
    }

    fn send(&self, message: Invalidation) -> usize {
        match self.tx.send(message) {
            Ok(receivers) => receivers,
            Err(err) => {
                tracing::debug!(message = ?err.0, "No subscribers for invalidation");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Apply every future message on this channel to `cache` from a
    /// background task. The task ends when all senders are dropped.
    ///
    /// If the task falls behind and messages are lost, the whole cache is
    /// cleared since the missed tenants are unknown.
    pub fn attach<D: TenantDirectory>(&self, cache: TenantResolutionCache<D>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        message.apply(&cache);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            skipped = skipped,
                            "Invalidation subscriber lagged, clearing tenant cache"
                        );
                        cache.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Invalidation channel closed");
                        break;
                    }
                }
            }
        })
    }
}
