//! Identity store: maps account owners to their profiles.

use crate::error::{LedgerError, Result};
use crate::ids::UserId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A registered account owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe registry of users, indexed by id and by email.
pub struct IdentityStore {
    users: DashMap<UserId, User>,
    by_email: DashMap<String, UserId>,
    next_id: AtomicU64,
}

impl IdentityStore {
    pub fn new() -> Self {
        IdentityStore {
            users: DashMap::new(),
            by_email: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new user under `email`.
    ///
    /// Fails with `AlreadyExists` if the email is taken. The email index entry
    /// is held while the user is inserted, so concurrent registrations of the
    /// same email produce exactly one user.
    pub fn register(&self, email: &str) -> Result<User> {
        let email = normalize_email(email)?;

        match self.by_email.entry(email.clone()) {
            Entry::Occupied(_) => Err(LedgerError::already_exists("user", email)),
            Entry::Vacant(slot) => {
                let id = UserId(self.next_id.fetch_add(1, Ordering::SeqCst));
                let now = Utc::now();
                let user = User {
                    id,
                    email,
                    created_at: now,
                    updated_at: now,
                };
                self.users.insert(id, user.clone());
                slot.insert(id);
                debug!("Registered user {} ({})", id, user.email);
                Ok(user)
            }
        }
    }

    /// Returns `true` if a user with the given email is registered.
    pub fn user_exists(&self, email: &str) -> bool {
        self.by_email.contains_key(email.trim())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.users
            .get(&id)
            .map(|u| u.value().clone())
            .ok_or_else(|| LedgerError::not_found("user", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        let email = email.trim();
        let id = self
            .by_email
            .get(email)
            .map(|id| *id.value())
            .ok_or_else(|| LedgerError::not_found("user", email))?;
        self.get_user(id)
    }

    /// Returns `true` if `id` belongs to a registered user.
    pub fn contains(&self, id: UserId) -> bool {
        self.users.contains_key(&id)
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidRecord {
            row: 0,
            message: "email must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
