//! The remote store the ledger service talks to.
//!
//! A backend must apply an [`EntryRequest`] as one indivisible step: the
//! `balance >= amount` condition, the balance mutations and the transaction
//! row either all happen or none do. For a SQL store this is a conditional
//! `UPDATE ... WHERE ki_points >= amount` plus the insert, inside one
//! database transaction.

use async_trait::async_trait;
use thiserror::Error;

use crate::Points;
use crate::engine::EngineError;
use crate::entry::{EntryReceipt, EntryRequest, TransactionQuery};
use crate::model::{IdempotencyKey, Transaction, TxId, TxStatus, UserId, UserRecord};

mod memory;
pub use memory::MemoryBackend;

/// Failure reported by a [`Backend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TxId),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Points, requested: Points },

    #[error("idempotency key {0} was already used for a different entry")]
    Conflict(IdempotencyKey),

    #[error("user {0} may not settle this transaction")]
    Forbidden(UserId),

    #[error("transaction {tx} cannot move from {from} to {to}")]
    InvalidTransition {
        tx: TxId,
        from: TxStatus,
        to: TxStatus,
    },

    #[error("entry rejected: {0}")]
    Invalid(String),
}

impl From<EngineError> for BackendError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InsufficientFunds {
                available,
                requested,
                ..
            } => BackendError::InsufficientFunds {
                balance: available,
                requested,
            },
            EngineError::IdempotencyConflict(key) => BackendError::Conflict(key),
            EngineError::TxNotFound(tx) => BackendError::TransactionNotFound(tx),
            EngineError::NotSender { actor, .. } => BackendError::Forbidden(actor),
            EngineError::InvalidTransition { tx, from, to } => {
                BackendError::InvalidTransition { tx, from, to }
            }
            other => BackendError::Invalid(other.to_string()),
        }
    }
}

/// Row-oriented remote store holding users and transactions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a user row, including its authoritative `ki_points` balance.
    async fn fetch_user(&self, user: UserId) -> Result<UserRecord, BackendError>;

    /// Filtered, paginated select over transactions, most recent first.
    async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> Result<Vec<Transaction>, BackendError>;

    /// Apply one entry atomically. A retried entry (same idempotency key and
    /// same content) returns the original record with `replayed` set.
    async fn append_entry(&self, entry: EntryRequest) -> Result<EntryReceipt, BackendError>;

    /// Move a pending entry to a terminal status on behalf of `actor`.
    async fn settle_entry(
        &self,
        tx: TxId,
        actor: UserId,
        status: TxStatus,
    ) -> Result<EntryReceipt, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_insufficient_funds_keeps_amounts() {
        let err = BackendError::from(EngineError::InsufficientFunds {
            user: UserId::new(),
            available: Points::new(50),
            requested: Points::new(100),
        });
        assert_eq!(
            err,
            BackendError::InsufficientFunds {
                balance: Points::new(50),
                requested: Points::new(100),
            }
        );
    }

    #[test]
    fn engine_validation_errors_become_invalid() {
        let err = BackendError::from(EngineError::ZeroAmount);
        assert_eq!(
            err,
            BackendError::Invalid("entry amount must be positive".to_string())
        );
    }

    #[test]
    fn not_sender_is_forbidden() {
        let actor = UserId::new();
        let err = BackendError::from(EngineError::NotSender {
            tx: TxId::new(),
            actor,
        });
        assert_eq!(err, BackendError::Forbidden(actor));
    }
}
