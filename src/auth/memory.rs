//! In-process identity provider.

use crate::error::{Result, StoreError};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::provider::{validate_credentials, AuthEvent, AuthSubscription, IdentityProvider, User};

/// Length of generated user ids.
const UID_LEN: usize = 28;

struct Account {
    user: User,
    /// Hex salt.
    salt: String,
    /// Hex SHA-256 of salt + password.
    password_hash: String,
}

impl Account {
    fn new(user: User, password: &str) -> Self {
        let salt = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
        let password_hash = hash_password(&salt, password);
        Self {
            user,
            salt,
            password_hash,
        }
    }

    fn verify(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity provider keeping accounts in memory.
///
/// Emails are matched case-insensitively. One session at a time.
pub struct InMemoryIdentityProvider {
    /// Accounts by lower-cased email.
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<User>>,
    listeners: RwLock<HashMap<u64, Sender<AuthEvent>>>,
    next_listener: AtomicU64,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    fn set_current(&self, user: Option<User>) {
        *self.current.write() = user.clone();

        let mut gone = Vec::new();
        {
            let listeners = self.listeners.read();
            for (id, tx) in listeners.iter() {
                if tx.send(AuthEvent::StateChanged(user.clone())).is_err() {
                    gone.push(*id);
                }
            }
        }
        if !gone.is_empty() {
            let mut listeners = self.listeners.write();
            for id in gone {
                listeners.remove(&id);
            }
        }
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn sign_up(&self, email: &str, password: &str) -> Result<User> {
        validate_credentials(email, password)?;
        let key = email.to_lowercase();

        let user = {
            let mut accounts = self.accounts.write();
            if accounts.contains_key(&key) {
                return Err(StoreError::EmailInUse(email.to_string()));
            }
            let uid: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(UID_LEN)
                .map(char::from)
                .collect();
            let user = User {
                uid,
                email: email.to_string(),
            };
            accounts.insert(key, Account::new(user.clone(), password));
            user
        };

        debug!(uid = %user.uid, "account created");
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let user = {
            let accounts = self.accounts.read();
            match accounts.get(&email.to_lowercase()) {
                Some(account) if account.verify(password) => account.user.clone(),
                _ => return Err(StoreError::InvalidCredentials),
            }
        };

        debug!(uid = %user.uid, "signed in");
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn sign_out(&self) -> Result<()> {
        if self.current.read().is_none() {
            return Ok(());
        }
        self.set_current(None);
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        self.current.read().clone()
    }

    fn subscribe(&self) -> AuthSubscription {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = unbounded();
        // Hold the listener lock so no change slips between the initial
        // state and registration
        let mut listeners = self.listeners.write();
        let _ = tx.send(AuthEvent::StateChanged(self.current_user()));
        listeners.insert(id, tx);
        AuthSubscription { id, receiver: rx }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.write().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_signs_in() {
        let provider = InMemoryIdentityProvider::new();
        let user = provider.sign_up("name@example.com", "secret1").unwrap();

        assert_eq!(user.uid.len(), UID_LEN);
        assert_eq!(provider.current_user(), Some(user));
    }

    #[test]
    fn test_duplicate_email() {
        let provider = InMemoryIdentityProvider::new();
        provider.sign_up("name@example.com", "secret1").unwrap();

        let result = provider.sign_up("Name@Example.com", "other-secret");
        assert!(matches!(result, Err(StoreError::EmailInUse(_))));
        assert_eq!(provider.account_count(), 1);
    }

    #[test]
    fn test_sign_in_checks_password() {
        let provider = InMemoryIdentityProvider::new();
        let user = provider.sign_up("name@example.com", "secret1").unwrap();
        provider.sign_out().unwrap();
        assert_eq!(provider.current_user(), None);

        assert!(matches!(
            provider.sign_in("name@example.com", "wrong-pass"),
            Err(StoreError::InvalidCredentials)
        ));
        assert!(matches!(
            provider.sign_in("nobody@example.com", "secret1"),
            Err(StoreError::InvalidCredentials)
        ));

        let again = provider.sign_in("NAME@example.com", "secret1").unwrap();
        assert_eq!(again, user);
    }

    #[test]
    fn test_sign_up_validates() {
        let provider = InMemoryIdentityProvider::new();
        assert!(matches!(
            provider.sign_up("not-an-email", "secret1"),
            Err(StoreError::Validation { .. })
        ));
        assert!(matches!(
            provider.sign_up("name@example.com", "123"),
            Err(StoreError::Validation { .. })
        ));
        assert_eq!(provider.account_count(), 0);
    }

    #[test]
    fn test_passwords_are_salted() {
        let provider = InMemoryIdentityProvider::new();
        provider.sign_up("a@example.com", "same-pass").unwrap();
        provider.sign_up("b@example.com", "same-pass").unwrap();

        let accounts = provider.accounts.read();
        let a = &accounts["a@example.com"];
        let b = &accounts["b@example.com"];
        assert_ne!(a.password_hash, b.password_hash);
        assert_ne!(a.password_hash, "same-pass");
    }

    #[test]
    fn test_subscription_events() {
        let provider = InMemoryIdentityProvider::new();
        let sub = provider.subscribe();
        assert_eq!(sub.receiver.try_recv().unwrap(), AuthEvent::StateChanged(None));

        let user = provider.sign_up("name@example.com", "secret1").unwrap();
        provider.sign_out().unwrap();

        assert_eq!(
            sub.receiver.try_recv().unwrap(),
            AuthEvent::StateChanged(Some(user))
        );
        assert_eq!(sub.receiver.try_recv().unwrap(), AuthEvent::StateChanged(None));

        provider.unsubscribe(sub.id);
        provider.sign_in("name@example.com", "secret1").unwrap();
        assert!(sub.receiver.try_recv().is_err());
    }
}
