//! # Memo Sync
//!
//! A memo collection that keeps every open view live. Each view watches
//! one owner's memos and receives that owner's complete, newest-first set
//! after every change.
//!
//! ## Core Concepts
//!
//! - **Memos**: title/content documents with a store-assigned id and creation time
//! - **Snapshots**: the full ordered set for one owner; subscribers replace, never merge
//! - **Watches**: standing subscriptions delivered as a stream or to a callback
//! - **Journal**: optional append-only persistence, replayed on open
//! - **Sessions**: a signed-in user's live list plus create/edit/delete actions
//!
//! ## Example
//!
//! ```ignore
//! use memo_sync::{MemoColor, MemoStore, OwnerId};
//!
//! let store = MemoStore::in_memory();
//! let owner = OwnerId::from("u1");
//!
//! let _watch = store.watch(&owner, |snapshot| {
//!     println!("{:?}", snapshot.titles());
//! })?;
//!
//! let memo = store.create(&owner, "Groceries", "Milk, eggs", MemoColor::Yellow)?;
//! store.update(&memo.id, "Groceries", "Milk, eggs, bread")?;
//! store.delete(&memo.id)?;
//! ```

pub mod auth;
pub mod collection;
pub mod error;
pub mod journal;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use auth::{
    validate_credentials, AuthContext, AuthEvent, AuthSubscription, IdentityProvider,
    InMemoryIdentityProvider, User,
};
pub use collection::MemoCollection;
pub use error::{Result, StoreError};
pub use journal::{Journal, JournalEntry, JournalOp};
pub use session::{MemoSession, DEFAULT_TITLE};
pub use store::{MemoStore, StoreConfig};
pub use subscriptions::{
    DropReason, Snapshot, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager, SyncEvent, Unsubscribe, Watch,
};
pub use types::*;
