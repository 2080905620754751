//! Static user directory
//!
//! Backs `UserDirectory` with a fixed list loaded from configuration. Lookups
//! are exact-match; no case folding and no provisioning.

use tracing::debug;

use crate::{BoxFuture, User, UserDirectory};

/// In-memory user directory built once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: Vec<User>,
}

impl StaticDirectory {
    pub fn new(users: Vec<User>) -> Self {
        debug!(users = users.len(), "static user directory built");
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for StaticDirectory {
    fn find_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Option<User>> {
        Box::pin(async move { self.users.iter().find(|u| u.email == email).cloned() })
    }

    fn find_by_login<'a>(&'a self, login: &'a str) -> BoxFuture<'a, Option<User>> {
        Box::pin(async move { self.users.iter().find(|u| u.login == login).cloned() })
    }
}
