//! Error types for ledger entry processing.

use thiserror::Error;

use crate::Points;
use crate::model::{IdempotencyKey, TransactionKind, TxId, TxStatus, UserId};

/// Error returned by [`Engine::apply`](super::Engine::apply) and
/// [`Engine::settle`](super::Engine::settle). A rejected entry leaves the
/// engine untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("insufficient funds for user {user}: available {available}, requested {requested}")]
    InsufficientFunds {
        user: UserId,
        available: Points,
        requested: Points,
    },

    #[error("user {0} cannot transfer points to themselves")]
    SelfTransfer(UserId),

    #[error("{0} entry is missing a party")]
    MissingParty(TransactionKind),

    #[error("{0} entry names an unexpected party")]
    UnexpectedParty(TransactionKind),

    #[error("entry amount must be positive")]
    ZeroAmount,

    #[error("entry description must not be empty")]
    EmptyDescription,

    #[error("{0} entries cannot be escrowed")]
    PendingNotSupported(TransactionKind),

    #[error("entries cannot be created as {0}")]
    InvalidInitialStatus(TxStatus),

    #[error("idempotency key {0} was already used for a different entry")]
    IdempotencyConflict(IdempotencyKey),

    #[error("transaction {0} not found")]
    TxNotFound(TxId),

    #[error("user {actor} is not the sender of transaction {tx}")]
    NotSender { tx: TxId, actor: UserId },

    #[error("transaction {tx} cannot move from {from} to {to}")]
    InvalidTransition {
        tx: TxId,
        from: TxStatus,
        to: TxStatus,
    },

    #[error("balance of user {0} would overflow")]
    Overflow(UserId),
}
