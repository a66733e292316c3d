//! Subscription types for live memo snapshots.

use crate::types::{Memo, MemoId, OwnerId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use super::manager::SubscriptionManager;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered snapshots before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// The complete, ordered set of one owner's memos at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub owner: OwnerId,
    /// Store revision this snapshot reflects.
    pub revision: u64,
    /// Newest first.
    pub memos: Vec<Memo>,
}

impl Snapshot {
    /// An empty snapshot (used before any delivery).
    pub fn empty(owner: OwnerId) -> Self {
        Self {
            owner,
            revision: 0,
            memos: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.memos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memos.is_empty()
    }

    pub fn get(&self, id: &MemoId) -> Option<&Memo> {
        self.memos.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MemoId) -> bool {
        self.get(id).is_some()
    }

    /// Titles in delivery order.
    pub fn titles(&self) -> Vec<&str> {
        self.memos.iter().map(|m| m.title.as_str()).collect()
    }
}

/// Events emitted by subscriptions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Full replacement of the subscriber's view.
    Snapshot { snapshot: Snapshot },

    /// Subscription was dropped; no further events follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// The store was closed.
    StoreClosed,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Cancellation token for a subscription.
///
/// Calling [`Unsubscribe::unsubscribe`] more than once is a no-op.
pub struct Unsubscribe {
    id: SubscriptionId,
    manager: Weak<SubscriptionManager>,
    done: AtomicBool,
}

impl Unsubscribe {
    pub(crate) fn new(id: SubscriptionId, manager: Weak<SubscriptionManager>) -> Self {
        Self {
            id,
            manager,
            done: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Terminate the watch. Returns true on the first call only.
    pub fn unsubscribe(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("done", &self.is_cancelled())
            .finish()
    }
}

/// Stream of snapshots for one owner plus its cancellation token.
///
/// Snapshots already buffered when the token fires can still be drained.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub owner: OwnerId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<SyncEvent>,
    /// Taken when the handle is converted into a watch.
    cancel: Option<Unsubscribe>,
    /// Latest snapshot pulled through `next_snapshot`.
    latest: Mutex<Option<Snapshot>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        owner: OwnerId,
        receiver: crossbeam_channel::Receiver<SyncEvent>,
        cancel: Unsubscribe,
    ) -> Self {
        Self {
            id,
            owner,
            receiver,
            cancel: Some(cancel),
            latest: Mutex::new(None),
        }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SyncEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SyncEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<SyncEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator over events; ends once the subscription is gone.
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, SyncEvent> {
        self.receiver.iter()
    }

    /// Wait for the next snapshot. `None` on timeout or once dropped.
    pub fn next_snapshot(&self, timeout: Duration) -> Option<Snapshot> {
        match self.receiver.recv_timeout(timeout) {
            Ok(SyncEvent::Snapshot { snapshot }) => {
                *self.latest.lock() = Some(snapshot.clone());
                Some(snapshot)
            }
            _ => None,
        }
    }

    /// Drain everything buffered and return the newest snapshot seen,
    /// including one pulled earlier through `next_snapshot`.
    pub fn latest(&self) -> Option<Snapshot> {
        let mut latest = self.latest.lock();
        while let Ok(event) = self.receiver.try_recv() {
            if let SyncEvent::Snapshot { snapshot } = event {
                *latest = Some(snapshot);
            }
        }
        latest.clone()
    }

    /// Terminate the subscription (idempotent).
    pub fn unsubscribe(&self) -> bool {
        self.cancel.as_ref().map_or(false, Unsubscribe::unsubscribe)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(true, Unsubscribe::is_cancelled)
    }

    /// Split into receiver and token, leaving the handle inert.
    pub(crate) fn into_parts(
        mut self,
    ) -> Option<(crossbeam_channel::Receiver<SyncEvent>, Unsubscribe)> {
        let cancel = self.cancel.take()?;
        Some((self.receiver.clone(), cancel))
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(owner: &OwnerId, revision: u64) -> Snapshot {
        Snapshot {
            revision,
            ..Snapshot::empty(owner.clone())
        }
    }

    fn setup() -> (Arc<SubscriptionManager>, OwnerId, SubscriptionHandle) {
        let manager = Arc::new(SubscriptionManager::new());
        let owner = OwnerId::from("u1");
        let handle = manager.subscribe(
            owner.clone(),
            SubscriptionConfig::default(),
            Snapshot::empty(owner.clone()),
        );
        (manager, owner, handle)
    }

    #[test]
    fn test_latest_skips_to_newest() {
        let (manager, owner, handle) = setup();
        for revision in 1..=3 {
            manager.broadcast_snapshot(&at(&owner, revision));
        }

        assert_eq!(handle.latest().map(|s| s.revision), Some(3));
        assert!(handle.try_recv().is_err());

        // Nothing new buffered: the cached snapshot is returned again
        assert_eq!(handle.latest().map(|s| s.revision), Some(3));
    }

    #[test]
    fn test_latest_keeps_next_snapshot_result() {
        let (_manager, _owner, handle) = setup();

        let initial = handle.next_snapshot(Duration::from_secs(1)).unwrap();
        assert_eq!(initial.revision, 0);
        assert_eq!(handle.latest(), Some(initial));
    }

    #[test]
    fn test_latest_ignores_drop_event() {
        let (manager, owner, handle) = setup();
        manager.broadcast_snapshot(&at(&owner, 4));
        assert!(handle.unsubscribe());

        assert_eq!(handle.latest().map(|s| s.revision), Some(4));
        assert!(matches!(
            handle.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_latest_after_close() {
        let (manager, _owner, handle) = setup();
        manager.close_all(DropReason::StoreClosed);

        // The initial snapshot is still buffered ahead of the drop
        assert_eq!(handle.latest().map(|s| s.revision), Some(0));
    }

    #[test]
    fn test_latest_none_when_only_raw_reads() {
        let (_manager, _owner, handle) = setup();
        assert!(matches!(handle.recv(), Ok(SyncEvent::Snapshot { .. })));
        assert_eq!(handle.latest(), None);
    }
}
