//! Subscription system for live memo snapshots.
//!
//! A subscription watches one owner's memos. Every event carries the
//! owner's entire current set, newest first, so a subscriber replaces its
//! view wholesale instead of merging.
//!
//! Subscriptions support:
//! - An initial snapshot on establishment
//! - Bounded buffers with slow-subscriber dropping
//! - Stream consumption ([`SubscriptionHandle`]) or callbacks ([`Watch`])
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(&OwnerId::from("u1"))?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(SyncEvent::Snapshot { snapshot }) => render(&snapshot.memos),
//!         Ok(SyncEvent::Dropped { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;
mod watch;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, Snapshot, SubscriptionConfig, SubscriptionHandle, SubscriptionId, SyncEvent,
    Unsubscribe,
};
pub use watch::Watch;
