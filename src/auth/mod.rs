//! Identity: who owns the memos being synced.
//!
//! The store only ever sees an opaque [`OwnerId`](crate::types::OwnerId).
//! This module supplies it: an [`IdentityProvider`] seam, an in-process
//! provider, and an explicitly owned [`AuthContext`] that follows the
//! provider's auth state.

mod context;
mod memory;
mod provider;

pub use context::AuthContext;
pub use memory::InMemoryIdentityProvider;
pub use provider::{
    validate_credentials, AuthEvent, AuthSubscription, IdentityProvider, User, MIN_PASSWORD_LEN,
};
