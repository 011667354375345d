use thiserror::Error;

use super::Epoch;

/// Terminal authentication failure.
///
/// `Clone` so that every caller waiting on the same failed login can be
/// handed the identical error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Login rejected by portal: {0}")]
    Rejected(String),

    #[error("Login did not reach an authenticated state: {0}")]
    ProbeFailed(String),

    #[error("Login handshake failed: {0}")]
    Handshake(String),

    #[error("Could not obtain credentials: {0}")]
    Credentials(String),

    #[error("Epoch {observed} is ahead of the current epoch {current}")]
    InvalidEpoch { observed: Epoch, current: Epoch },

    #[error("Re-authentication requested before any epoch was observed")]
    EpochNotObserved,

    #[error("Login task aborted: {0}")]
    Aborted(String),
}

impl AuthError {
    /// Usage errors point at a bug in the caller rather than at the portal
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidEpoch { .. } | AuthError::EpochNotObserved
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Handshake(err.to_string())
    }
}
