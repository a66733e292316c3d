//! Identity provider seam.

use crate::error::{Result, StoreError};
use crate::types::OwnerId;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// An authenticated user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier, used as the memo owner.
    pub uid: String,
    pub email: String,
}

impl User {
    pub fn owner_id(&self) -> OwnerId {
        OwnerId(self.uid.clone())
    }
}

/// Auth state notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    /// The signed-in user changed (None = signed out).
    StateChanged(Option<User>),
}

/// A stream of auth state changes, starting with the state at subscribe time.
pub struct AuthSubscription {
    pub id: u64,
    pub receiver: Receiver<AuthEvent>,
}

/// Something that can authenticate users and report who is signed in.
pub trait IdentityProvider: Send + Sync {
    /// Register a new account and sign it in.
    fn sign_up(&self, email: &str, password: &str) -> Result<User>;

    fn sign_in(&self, email: &str, password: &str) -> Result<User>;

    fn sign_out(&self) -> Result<()>;

    fn current_user(&self) -> Option<User>;

    /// Observe auth state changes.
    fn subscribe(&self) -> AuthSubscription;

    fn unsubscribe(&self, id: u64);
}

/// Check an email/password pair the way the sign-in form does.
pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if !is_valid_email(email) {
        return Err(StoreError::validation("email", "Invalid email address"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(StoreError::validation(
            "password",
            "Password must be at least 6 characters",
        ));
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}
