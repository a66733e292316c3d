//! Session controller: the signed-in user's live memo list and the actions
//! a memo board offers.
//!
//! The session follows the auth context. When the user changes, the old
//! watch is torn down. With nobody signed in the list is empty. Otherwise a
//! new watch replaces the list with every snapshot the store delivers. The
//! session never edits the list itself; mutations show up once the store
//! pushes the next snapshot.

use crate::auth::{AuthContext, User};
use crate::error::{Result, StoreError};
use crate::store::MemoStore;
use crate::subscriptions::{Snapshot, Watch};
use crate::types::{Memo, MemoColor, MemoId, OwnerId};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Title given to memos created without one.
pub const DEFAULT_TITLE: &str = "New Memo";

#[derive(Default)]
struct ViewState {
    owner: Option<OwnerId>,
    snapshot: Option<Snapshot>,
}

#[derive(Default)]
struct SharedView {
    state: Mutex<ViewState>,
    changed: Condvar,
}

impl SharedView {
    fn reset(&self, owner: Option<OwnerId>) {
        let mut state = self.state.lock();
        state.owner = owner;
        state.snapshot = None;
        self.changed.notify_all();
    }

    fn replace(&self, snapshot: Snapshot) {
        let mut state = self.state.lock();
        // Late delivery from a watch that belonged to the previous user
        if state.owner.as_ref() != Some(&snapshot.owner) {
            return;
        }
        state.snapshot = Some(snapshot);
        self.changed.notify_all();
    }
}

/// One user's view onto the memo store.
pub struct MemoSession {
    store: Arc<MemoStore>,
    auth: AuthContext,
    watch: Option<Watch>,
    view: Arc<SharedView>,
}

impl MemoSession {
    /// Start a session and subscribe for whoever is signed in.
    pub fn new(store: Arc<MemoStore>, auth: AuthContext) -> Result<Self> {
        let mut session = Self {
            store,
            auth,
            watch: None,
            view: Arc::new(SharedView::default()),
        };
        session.refresh()?;
        Ok(session)
    }

    /// Pick up auth changes and re-target the watch. Returns true if the
    /// watched owner changed.
    pub fn refresh(&mut self) -> Result<bool> {
        self.auth.poll();
        let wanted = self.auth.user().map(User::owner_id);
        if self.view.state.lock().owner == wanted && (wanted.is_none() || self.watch.is_some()) {
            return Ok(false);
        }

        if let Some(watch) = self.watch.take() {
            watch.unsubscribe();
        }
        self.view.reset(wanted.clone());

        if let Some(owner) = wanted {
            let view = Arc::clone(&self.view);
            let watch = self.store.watch_with(
                &owner,
                move |snapshot| view.replace(snapshot),
                |reason| warn!(?reason, "memo watch ended"),
            )?;
            self.watch = Some(watch);
        }
        Ok(true)
    }

    pub fn user(&self) -> Option<&User> {
        self.auth.user()
    }

    pub fn is_loading(&self) -> bool {
        self.auth.is_loading()
    }

    /// The displayed memos, newest first (empty when signed out).
    pub fn memos(&self) -> Vec<Memo> {
        self.view
            .state
            .lock()
            .snapshot
            .as_ref()
            .map(|s| s.memos.clone())
            .unwrap_or_default()
    }

    /// The last snapshot delivered to this session.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.view.state.lock().snapshot.clone()
    }

    /// A displayed memo by id.
    pub fn find(&self, id: &MemoId) -> Option<Memo> {
        self.view
            .state
            .lock()
            .snapshot
            .as_ref()
            .and_then(|s| s.get(id).cloned())
    }

    /// Block until the view reflects store revision `min` or later.
    ///
    /// Only mutations of this user's memos produce new snapshots here.
    pub fn wait_for_revision(&self, min: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.view.state.lock();
        loop {
            if state.snapshot.as_ref().map_or(false, |s| s.revision >= min) {
                return true;
            }
            if self.view.changed.wait_until(&mut state, deadline).timed_out() {
                return state.snapshot.as_ref().map_or(false, |s| s.revision >= min);
            }
        }
    }

    // --- Auth ---

    pub fn sign_up(&mut self, email: &str, password: &str) -> Result<User> {
        let user = self.auth.sign_up(email, password);
        report(&user, "Account created successfully!", "Authentication failed");
        let user = user?;
        self.refresh()?;
        Ok(user)
    }

    pub fn sign_in(&mut self, email: &str, password: &str) -> Result<User> {
        let user = self.auth.sign_in(email, password);
        report(&user, "Logged in successfully!", "Authentication failed");
        let user = user?;
        self.refresh()?;
        Ok(user)
    }

    pub fn sign_out(&mut self) -> Result<()> {
        self.auth.sign_out()?;
        self.refresh()?;
        Ok(())
    }

    // --- Memo actions ---

    /// Create a memo for the signed-in user with a random palette color.
    pub fn add_memo(&self, title: &str, content: &str) -> Result<Memo> {
        let owner = self.require_owner()?;
        if title.trim().is_empty() && content.trim().is_empty() {
            return Err(StoreError::validation(
                "memo",
                "title or content is required",
            ));
        }

        let title = if title.is_empty() { DEFAULT_TITLE } else { title };
        let result = self
            .store
            .create(&owner, title, content, MemoColor::random());
        report(&result, "Memo added!", "Failed to add memo");
        result
    }

    /// Replace title and content of one of the user's memos.
    pub fn edit_memo(&self, id: &MemoId, title: &str, content: &str) -> Result<Memo> {
        let result = self
            .check_owned(id)
            .and_then(|_| self.store.update(id, title, content));
        report(&result, "Memo updated", "Failed to update memo");
        result
    }

    /// Delete one of the user's memos.
    pub fn delete_memo(&self, id: &MemoId) -> Result<()> {
        let result = self.check_owned(id).and_then(|_| self.store.delete(id));
        report(&result, "Memo deleted", "Failed to delete memo");
        result
    }

    fn require_owner(&self) -> Result<OwnerId> {
        self.auth
            .user()
            .map(User::owner_id)
            .ok_or(StoreError::Unauthenticated)
    }

    fn check_owned(&self, id: &MemoId) -> Result<()> {
        let owner = self.require_owner()?;
        let memo = self
            .store
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if memo.owner_id != owner {
            return Err(StoreError::PermissionDenied(format!(
                "memo {} belongs to another user",
                id
            )));
        }
        Ok(())
    }
}

/// Surface an action outcome to whoever is watching the logs.
fn report<T>(result: &Result<T>, ok: &str, failed: &str) {
    match result {
        Ok(_) => info!("{ok}"),
        Err(e) => warn!(error = %e, "{failed}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{IdentityProvider, InMemoryIdentityProvider};

    const WAIT: Duration = Duration::from_secs(2);

    fn setup() -> (Arc<MemoStore>, Arc<InMemoryIdentityProvider>, MemoSession) {
        let store = Arc::new(MemoStore::in_memory());
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let auth = AuthContext::init(provider.clone());
        let session = MemoSession::new(store.clone(), auth).unwrap();
        (store, provider, session)
    }

    #[test]
    fn test_signed_out_session() {
        let (_, _, session) = setup();
        assert!(session.user().is_none());
        assert!(session.memos().is_empty());
        assert!(matches!(
            session.add_memo("t", "c"),
            Err(StoreError::Unauthenticated)
        ));
    }

    #[test]
    fn test_add_memo_defaults() {
        let (store, _, mut session) = setup();
        session.sign_up("name@example.com", "secret1").unwrap();

        let memo = session.add_memo("", "just a body").unwrap();
        assert_eq!(memo.title, DEFAULT_TITLE);
        assert!(MemoColor::PALETTE.contains(&memo.color));

        assert!(session.wait_for_revision(store.revision(), WAIT));
        assert_eq!(session.memos(), vec![memo]);
    }

    #[test]
    fn test_add_memo_requires_text() {
        let (store, _, mut session) = setup();
        session.sign_up("name@example.com", "secret1").unwrap();

        assert!(matches!(
            session.add_memo("  ", "\n"),
            Err(StoreError::Validation { .. })
        ));
        assert_eq!(store.stats().memo_count, 0);
    }

    #[test]
    fn test_edit_and_delete_flow() {
        let (store, _, mut session) = setup();
        session.sign_up("name@example.com", "secret1").unwrap();

        let memo = session.add_memo("Draft", "body").unwrap();
        session.edit_memo(&memo.id, "Final", "done").unwrap();
        assert!(session.wait_for_revision(store.revision(), WAIT));
        assert_eq!(session.find(&memo.id).unwrap().title, "Final");

        session.delete_memo(&memo.id).unwrap();
        assert!(session.wait_for_revision(store.revision(), WAIT));
        assert!(session.memos().is_empty());

        assert!(matches!(
            session.delete_memo(&memo.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_cannot_touch_other_users_memos() {
        let (store, _, mut session) = setup();
        let theirs = store
            .create(&OwnerId::from("someone-else"), "Private", "", MemoColor::Pink)
            .unwrap();

        session.sign_up("name@example.com", "secret1").unwrap();

        assert!(matches!(
            session.edit_memo(&theirs.id, "mine now", ""),
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(matches!(
            session.delete_memo(&theirs.id),
            Err(StoreError::PermissionDenied(_))
        ));
        assert_eq!(store.get(&theirs.id).unwrap().title, "Private");
        assert!(session.memos().is_empty());
    }

    #[test]
    fn test_sign_out_clears_and_switches_users() {
        let (store, provider, mut session) = setup();
        session.sign_up("a@example.com", "secret1").unwrap();
        session.add_memo("A's memo", "").unwrap();
        assert!(session.wait_for_revision(store.revision(), WAIT));
        assert_eq!(session.memos().len(), 1);

        session.sign_out().unwrap();
        assert!(session.memos().is_empty());
        assert_eq!(store.stats().subscription_count, 0);

        // Another user signs in through the provider directly
        provider.sign_up("b@example.com", "secret1").unwrap();
        assert!(session.refresh().unwrap());
        assert_eq!(session.user().unwrap().email, "b@example.com");
        let initial = store.revision();
        assert!(session.wait_for_revision(initial, WAIT));
        assert!(session.memos().is_empty());
    }

    #[test]
    fn test_refresh_without_change_is_noop() {
        let (store, _, mut session) = setup();
        session.sign_up("a@example.com", "secret1").unwrap();
        assert!(!session.refresh().unwrap());
        assert_eq!(store.stats().subscription_count, 1);
    }
}
