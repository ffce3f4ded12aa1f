//! Errors surfaced by the ledger service.

use thiserror::Error;

use crate::Points;
use crate::backend::BackendError;
use crate::model::{IdempotencyKey, PostId};
use crate::posts::PostStatus;

/// Failure of a [`KiLedger`](crate::KiLedger) operation. Validation errors
/// are detected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("no user is signed in")]
    NotAuthenticated,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Points, requested: Points },

    #[error("cannot transfer points to yourself")]
    SelfTransfer,

    #[error("a description is required")]
    EmptyDescription,

    #[error("idempotency key {0} was already used for a different transfer")]
    IdempotencyConflict(IdempotencyKey),

    #[error("only the paying party can settle post {0}")]
    NotPayer(PostId),

    #[error("post {post} is {status}")]
    InvalidPostState { post: PostId, status: PostStatus },

    #[error("failed to write to backend: {0}")]
    BackendWriteFailed(#[source] BackendError),

    #[error("failed to read from backend: {0}")]
    BackendReadFailed(#[source] BackendError),
}

impl LedgerError {
    /// Classify a failed backend write. Business rejections keep their own
    /// variant; anything else is a write failure.
    pub fn from_write(e: BackendError) -> Self {
        match e {
            BackendError::InsufficientFunds { balance, requested } => {
                LedgerError::InsufficientFunds { balance, requested }
            }
            BackendError::Conflict(key) => LedgerError::IdempotencyConflict(key),
            other => LedgerError::BackendWriteFailed(other),
        }
    }

    pub fn from_read(e: BackendError) -> Self {
        LedgerError::BackendReadFailed(e)
    }

    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::NotAuthenticated => "Please sign in to continue.".to_string(),
            LedgerError::InvalidAmount(_) => {
                "Enter a whole number of Ki points greater than zero.".to_string()
            }
            LedgerError::InsufficientFunds { balance, requested } => format!(
                "You need {requested} Ki points but only have {balance}."
            ),
            LedgerError::SelfTransfer => "You cannot send Ki points to yourself.".to_string(),
            LedgerError::EmptyDescription => "Add a short description.".to_string(),
            LedgerError::IdempotencyConflict(_) => {
                "This request was already submitted with different details.".to_string()
            }
            LedgerError::NotPayer(_) => "Only the paying member can do this.".to_string(),
            LedgerError::InvalidPostState { status, .. } => {
                format!("This post is already {status}.")
            }
            LedgerError::BackendWriteFailed(_) => {
                "Could not save your change. Please try again.".to_string()
            }
            LedgerError::BackendReadFailed(_) => {
                "Could not load your Ki points. Please try again.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_write_keeps_its_variant() {
        let err = LedgerError::from_write(BackendError::InsufficientFunds {
            balance: Points::new(50),
            requested: Points::new(100),
        });
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                balance: Points::new(50),
                requested: Points::new(100),
            }
        );
        assert_eq!(err.user_message(), "You need 100 Ki points but only have 50.");
    }

    #[test]
    fn outage_is_a_write_failure() {
        let err = LedgerError::from_write(BackendError::Unavailable("offline".to_string()));
        assert!(matches!(err, LedgerError::BackendWriteFailed(_)));
        assert_eq!(
            err.to_string(),
            "failed to write to backend: backend unavailable: offline"
        );
    }

    #[test]
    fn read_failures_are_wrapped() {
        let err = LedgerError::from_read(BackendError::Unavailable("offline".to_string()));
        assert!(matches!(err, LedgerError::BackendReadFailed(_)));
        assert_eq!(
            err.user_message(),
            "Could not load your Ki points. Please try again."
        );
    }
}
