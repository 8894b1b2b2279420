//! Active user registry
//!
//! Tracks the users currently logged in to the game session.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::server::UserRegistry;

/// A logged-in player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user id chosen at login
    pub id: String,
    /// Display name
    pub name: String,
}

impl User {
    /// Create a user from an id and a display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Users currently present in the session, keyed by id
#[derive(Debug, Default)]
pub struct Users {
    users: RwLock<BTreeMap<String, Arc<User>>>,
}

impl Users {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user unless its id is already taken
    ///
    /// Returns `false` and leaves the registry untouched if another user
    /// holds the same id.
    pub fn add(&self, user: Arc<User>) -> bool {
        match self.users.write().entry(user.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                debug!("Adding user {} ({})", user.id, user.name);
                slot.insert(user);
                true
            }
        }
    }

    /// Remove a user by id
    pub fn remove(&self, user_id: &str) -> Option<Arc<User>> {
        let removed = self.users.write().remove(user_id);
        if removed.is_some() {
            debug!("Removed user {}", user_id);
        }
        removed
    }

    /// All users, ordered by id
    pub fn list(&self) -> Vec<Arc<User>> {
        self.users.read().values().cloned().collect()
    }

    /// Number of users present
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether nobody is logged in
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl UserRegistry for Users {
    fn remove(&self, user_id: &str) {
        Users::remove(self, user_id);
    }
}
