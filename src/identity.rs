//! Current-User Resolution
//!
//! When a caller does not name a user, the flag is scoped to whoever
//! [`Identity::current_user`] reports.

use crate::storage::UserId;

/// Resolves the user a request is running as.
pub trait Identity {
    /// Returns `None` when nobody is logged in.
    fn current_user(&self) -> Option<UserId>;
}

/// No current user. Callers must always pass one explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Identity for Anonymous {
    fn current_user(&self) -> Option<UserId> {
        None
    }
}

/// Always reports the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedUser(pub UserId);

impl Identity for FixedUser {
    fn current_user(&self) -> Option<UserId> {
        Some(self.0)
    }
}
