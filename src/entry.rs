//! Requests sent to the ledger backend and what it answers with.

use chrono::{DateTime, Utc};

use crate::Points;
use crate::model::{
    Category, IdempotencyKey, Metadata, Transaction, TransactionKind, TxId, TxStatus, UserId,
};

/// A ledger entry to be applied atomically: balance checks, balance
/// mutations and the transaction row happen together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    pub idempotency_key: IdempotencyKey,
    pub kind: TransactionKind,
    pub sender: Option<UserId>,
    pub recipient: Option<UserId>,
    pub amount: Points,
    pub category: Category,
    pub description: String,
    /// `Pending` escrows a transfer until it is settled.
    pub status: TxStatus,
    pub metadata: Option<Metadata>,
}

impl EntryRequest {
    fn build(
        kind: TransactionKind,
        sender: Option<UserId>,
        recipient: Option<UserId>,
        amount: Points,
        category: Category,
        description: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: IdempotencyKey::new(),
            kind,
            sender,
            recipient,
            amount,
            category,
            description: description.into(),
            status: TxStatus::Completed,
            metadata: None,
        }
    }

    /// Move points from `sender` to `recipient`.
    pub fn transfer(
        sender: UserId,
        recipient: UserId,
        amount: Points,
        description: impl Into<String>,
    ) -> Self {
        Self::build(
            TransactionKind::Transfer,
            Some(sender),
            Some(recipient),
            amount,
            Category::Transfer,
            description,
        )
    }

    /// Grant points to `recipient`.
    pub fn earned(
        recipient: UserId,
        amount: Points,
        category: Category,
        description: impl Into<String>,
    ) -> Self {
        Self::build(
            TransactionKind::Earned,
            None,
            Some(recipient),
            amount,
            category,
            description,
        )
    }

    /// Pay points from `sender` to the platform.
    pub fn spent(
        sender: UserId,
        amount: Points,
        category: Category,
        description: impl Into<String>,
    ) -> Self {
        Self::build(
            TransactionKind::Spent,
            Some(sender),
            None,
            amount,
            category,
            description,
        )
    }

    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = TxStatus::Pending;
        self
    }

    /// Whether `tx`, recorded with `initial_status`, is what this request
    /// would have recorded. Used to tell a retried submission apart from a
    /// reused idempotency key. A settled escrow still matches its pending
    /// request.
    pub fn is_same_entry(&self, tx: &Transaction, initial_status: TxStatus) -> bool {
        tx.idempotency_key == self.idempotency_key
            && initial_status == self.status
            && tx.kind == self.kind
            && tx.sender == self.sender
            && tx.recipient == self.recipient
            && tx.amount == self.amount
            && tx.category == self.category
    }

    pub(crate) fn into_transaction(self, id: TxId, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            kind: self.kind,
            category: self.category,
            description: self.description,
            status: self.status,
            created_at,
            metadata: self.metadata,
            idempotency_key: self.idempotency_key,
        }
    }
}

/// Confirmation of an applied (or replayed) entry, with the authoritative
/// balances of both parties right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReceipt {
    pub transaction: Transaction,
    pub sender_balance: Option<Points>,
    pub recipient_balance: Option<Points>,
    /// `true` when the idempotency key matched an existing entry and nothing
    /// was applied.
    pub replayed: bool,
}

impl EntryReceipt {
    pub fn balance_of(&self, user: UserId) -> Option<Points> {
        if self.transaction.sender == Some(user) {
            self.sender_balance
        } else if self.transaction.recipient == Some(user) {
            self.recipient_balance
        } else {
            None
        }
    }
}

/// Position of a transaction in the `(created_at, id)` descending order
/// queries return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: TxId,
}

impl Cursor {
    pub fn of(tx: &Transaction) -> Self {
        Self {
            created_at: tx.created_at,
            id: tx.id,
        }
    }
}

/// Filtered, paginated select over a user's transactions. Results are
/// ordered most recent first, ties broken by descending id.
///
/// Page with `before` set to the cursor of the last row received: rows
/// written meanwhile then cannot shift later pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionQuery {
    pub user: UserId,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Only rows strictly after this cursor in result order.
    pub before: Option<Cursor>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TransactionQuery {
    pub fn for_user(user: UserId) -> Self {
        Self {
            user,
            since: None,
            before: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn before(mut self, cursor: Cursor) -> Self {
        self.before = Some(cursor);
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        tx.involves(self.user)
            && self.since.is_none_or(|since| tx.created_at >= since)
            && self.before.is_none_or(|cursor| Cursor::of(tx) < cursor)
    }
}
