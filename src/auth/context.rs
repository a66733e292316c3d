//! Owned auth state for one consumer.

use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

use super::provider::{AuthEvent, AuthSubscription, IdentityProvider, User};

/// Tracks who is signed in by following a provider's auth events.
///
/// Created with [`AuthContext::init`], released with
/// [`AuthContext::teardown`] (or on drop). Nothing is global; swap the
/// provider to fake identities in tests.
pub struct AuthContext {
    provider: Arc<dyn IdentityProvider>,
    subscription: Option<AuthSubscription>,
    user: Option<User>,
    loading: bool,
}

impl AuthContext {
    /// Subscribe to `provider` and pick up the current state.
    pub fn init(provider: Arc<dyn IdentityProvider>) -> Self {
        let subscription = provider.subscribe();
        let mut ctx = Self {
            provider,
            subscription: Some(subscription),
            user: None,
            loading: true,
        };
        ctx.poll();
        ctx
    }

    /// Apply pending auth events. Returns true if the user changed.
    pub fn poll(&mut self) -> bool {
        let Some(subscription) = &self.subscription else {
            return false;
        };

        let mut changed = false;
        while let Ok(AuthEvent::StateChanged(user)) = subscription.receiver.try_recv() {
            self.loading = false;
            if self.user != user {
                debug!(
                    from = ?self.user.as_ref().map(|u| &u.uid),
                    to = ?user.as_ref().map(|u| &u.uid),
                    "auth state changed"
                );
                self.user = user;
                changed = true;
            }
        }
        changed
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// True until the first auth state has been observed.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn sign_up(&mut self, email: &str, password: &str) -> Result<User> {
        let user = self.provider.sign_up(email, password)?;
        self.poll();
        Ok(user)
    }

    pub fn sign_in(&mut self, email: &str, password: &str) -> Result<User> {
        let user = self.provider.sign_in(email, password)?;
        self.poll();
        Ok(user)
    }

    pub fn sign_out(&mut self) -> Result<()> {
        self.provider.sign_out()?;
        self.poll();
        Ok(())
    }

    /// Stop following the provider. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.provider.unsubscribe(subscription.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.teardown();
    }
}
