// Error types for the ledger client, session store and views

use thiserror::Error;

/// Everything that can go wrong between a key press and the ledger endpoint.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input rejected locally, before any request was sent.
    #[error("{0}")]
    Invalid(String),

    /// The endpoint answered `ok: false`.
    #[error("{0}")]
    Rejected(String),

    /// The request could not complete.
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered with something that is not a ledger reply.
    #[error("unreadable reply: {0}")]
    Decode(String),

    /// Session storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A thread panicked while holding the storage lock.
    #[error("storage lock poisoned")]
    Poisoned,
}

impl LedgerError {
    /// Network and decode failures are both "the request did not come back
    /// with an answer" from the user's point of view.
    pub fn is_transport(&self) -> bool {
        matches!(self, LedgerError::Network(_) | LedgerError::Decode(_))
    }

    /// The bare message, without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            LedgerError::Invalid(msg)
            | LedgerError::Rejected(msg)
            | LedgerError::Network(msg)
            | LedgerError::Decode(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
