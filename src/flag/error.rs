use thiserror::Error;

/// Errors returned by flag operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagError {
    /// The flag id was empty
    #[error("flag id must not be empty")]
    EmptyId,

    /// No user was given and there is no current user
    #[error("no user to scope the flag to")]
    MissingUser,

    /// The store refused to insert an entry
    #[error("store refused to insert '{key}'")]
    InsertRejected { key: String },

    /// The store refused to update an entry
    #[error("store refused to update '{key}'")]
    UpdateRejected { key: String },

    /// A stored entry could not be decoded
    #[error("stored entry '{key}' is malformed: {reason}")]
    Corrupt { key: String, reason: String },
}

impl FlagError {
    /// True for errors raised before the store was touched.
    ///
    /// These mean the caller's arguments were unusable, as opposed to the
    /// store refusing a write or holding malformed data.
    pub fn is_invalid_args(&self) -> bool {
        matches!(self, FlagError::EmptyId | FlagError::MissingUser)
    }
}
