use std::fmt;

use thiserror::Error;

/// Detailed authentication failure information
#[derive(Debug, Clone)]
pub enum AuthError {
    InvalidCredentials,
    /// Both the access and refresh tokens are beyond recovery; re-login required
    SessionExpired,
    MalformedResponse,
    Unknown(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "login or password is incorrect"),
            Self::SessionExpired => write!(f, "session expired, please log in again"),
            Self::MalformedResponse => write!(f, "unexpected server response on attempted auth"),
            Self::Unknown(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(AuthError),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("catalog fetch failed: {0}")]
    Fetch(String),

    #[error("invalid cart request: {0}")]
    Validation(String),

    #[error("order rejected: {0}")]
    Order(String),

    #[error("network error: {0}")]
    Transport(String),

    #[error("item {0} was not found in the shop")]
    ItemNotFound(String),

    #[error("wallet {0} could not be found")]
    WalletNotFound(String),

    #[error("snapshot storage error: {0}")]
    Snapshot(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl Error {
    /// Whether this error invalidates the session (user must re-login)
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::NotLoggedIn)
    }
}
