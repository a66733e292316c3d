//! Subscription manager for broadcasting owner snapshots.

use crate::types::OwnerId;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    DropReason, Snapshot, SubscriptionConfig, SubscriptionHandle, SubscriptionId, SyncEvent,
    Unsubscribe,
};

/// Internal subscription state.
struct Subscription {
    owner: OwnerId,
    sender: Sender<SyncEvent>,
}

impl Subscription {
    /// Try to send an event. Err carries the reason the subscriber must go.
    fn try_send(&self, event: SyncEvent) -> Result<(), DropReason> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => Err(DropReason::Disconnected),
        }
    }
}

/// Manages subscriptions and broadcasts snapshots.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription for `owner`, queueing `initial` as its
    /// first event.
    pub fn subscribe(
        self: &Arc<Self>,
        owner: OwnerId,
        config: SubscriptionConfig,
        initial: Snapshot,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        // Fresh channel with capacity >= 1, so this cannot fail.
        let _ = sender.try_send(SyncEvent::Snapshot { snapshot: initial });

        self.subscriptions.write().insert(
            id,
            Subscription {
                owner: owner.clone(),
                sender,
            },
        );
        debug!(subscription = id.0, owner = %owner, "subscribed");

        SubscriptionHandle::new(id, owner, receiver, Unsubscribe::new(id, Arc::downgrade(self)))
    }

    /// Unsubscribe and clean up. Returns false if already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id);
        match removed {
            Some(sub) => {
                // Best effort; the receiver may already be gone
                let _ = sub.sender.try_send(SyncEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
                debug!(subscription = id.0, owner = %sub.owner, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of live subscriptions watching `owner`.
    pub fn subscribers_for(&self, owner: &OwnerId) -> usize {
        self.subscriptions
            .read()
            .values()
            .filter(|s| &s.owner == owner)
            .count()
    }

    /// Deliver `snapshot` to every subscription on its owner.
    /// Drops subscribers that fail to receive.
    pub fn broadcast_snapshot(&self, snapshot: &Snapshot) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.owner != snapshot.owner {
                    continue;
                }
                let event = SyncEvent::Snapshot {
                    snapshot: snapshot.clone(),
                };
                if let Err(reason) = sub.try_send(event) {
                    to_remove.push((*id, reason));
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for (id, reason) in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = id.0, owner = %sub.owner, ?reason, "dropping subscriber");
                    // Might fail on a full buffer; the disconnect still tells the reader
                    let _ = sub.sender.try_send(SyncEvent::Dropped { reason });
                }
            }
        }
    }

    /// Drop every subscription with `reason`.
    pub fn close_all(&self, reason: DropReason) -> usize {
        let drained: Vec<(SubscriptionId, Subscription)> =
            self.subscriptions.write().drain().collect();
        let count = drained.len();
        for (_, sub) in drained {
            let _ = sub.sender.try_send(SyncEvent::Dropped {
                reason: reason.clone(),
            });
        }
        count
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
