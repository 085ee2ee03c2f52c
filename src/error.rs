use thiserror::Error;

/// Everything the storage and session layers can report to the user.
///
/// Only a bootstrap-time `Store` error is fatal; every other variant is shown
/// in the status line and the session keeps running.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("username already exists")]
    DuplicateUsername,

    /// Unknown username and wrong password are deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("no chat partner selected")]
    NoPeerSelected,

    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
