//! Callback delivery for subscriptions.

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::debug;

use super::types::{
    DropReason, Snapshot, SubscriptionHandle, SubscriptionId, SyncEvent, Unsubscribe,
};
use crate::error::{Result, StoreError};

struct Shared {
    token: Unsubscribe,
    cancelled: AtomicBool,
    /// Held for the duration of each callback.
    gate: Mutex<()>,
}

/// A live subscription whose snapshots are pushed to a callback.
///
/// Callbacks run one at a time on a dedicated thread. Once
/// [`Watch::unsubscribe`] returns, no further callback starts. Dropping the
/// watch unsubscribes.
pub struct Watch {
    id: SubscriptionId,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    delivery_thread: ThreadId,
}

impl Watch {
    pub(crate) fn spawn<F, D>(
        handle: SubscriptionHandle,
        mut on_change: F,
        mut on_drop: D,
    ) -> Result<Self>
    where
        F: FnMut(Snapshot) + Send + 'static,
        D: FnMut(DropReason) + Send + 'static,
    {
        let id = handle.id;
        let (receiver, token) = handle
            .into_parts()
            .ok_or_else(|| StoreError::Unavailable("subscription already cancelled".into()))?;

        let shared = Arc::new(Shared {
            token,
            cancelled: AtomicBool::new(false),
            gate: Mutex::new(()),
        });

        let worker = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("memo-watch-{}", id.0))
            .spawn(move || deliver(&worker, receiver, &mut on_change, &mut on_drop));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                shared.token.unsubscribe();
                return Err(e.into());
            }
        };
        let delivery_thread = thread.thread().id();

        Ok(Self {
            id,
            shared,
            thread: Some(thread),
            delivery_thread,
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Terminate the watch. Safe to call repeatedly, including from inside
    /// the callback.
    pub fn unsubscribe(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.token.unsubscribe();

        // Wait out a callback that is already running on another thread
        if thread::current().id() != self.delivery_thread {
            drop(self.shared.gate.lock());
        }
    }

    pub fn is_active(&self) -> bool {
        !self.shared.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.unsubscribe();
        if let Some(thread) = self.thread.take() {
            if thread::current().id() != self.delivery_thread {
                let _ = thread.join();
            }
        }
    }
}

fn deliver<F, D>(shared: &Shared, receiver: Receiver<SyncEvent>, on_change: &mut F, on_drop: &mut D)
where
    F: FnMut(Snapshot),
    D: FnMut(DropReason),
{
    let mut dropped = None;
    for event in receiver.iter() {
        match event {
            SyncEvent::Snapshot { snapshot } => {
                let _gate = shared.gate.lock();
                if shared.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                on_change(snapshot);
            }
            SyncEvent::Dropped { reason } => {
                dropped = Some(reason);
                break;
            }
        }
    }

    if shared.cancelled.load(Ordering::SeqCst) {
        return;
    }
    let reason = dropped.unwrap_or(DropReason::Disconnected);
    if reason != DropReason::Unsubscribed {
        debug!(subscription = shared.token.id().0, ?reason, "watch terminated by store");
        let _gate = shared.gate.lock();
        on_drop(reason);
    }
}
