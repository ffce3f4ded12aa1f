//! Core domain types for the Ki points ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Points;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// User identifier, as issued by the authentication provider.
    UserId
);
uuid_id!(
    /// Transaction identifier.
    TxId
);
uuid_id!(
    /// Client-generated token that makes a submission safe to retry.
    IdempotencyKey
);
uuid_id!(
    /// Ask/offer post identifier.
    PostId
);

/// What a transaction does to balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Points granted to the recipient by the platform.
    Earned,
    /// Points paid by the sender to the platform.
    Spent,
    /// Points moved from sender to recipient.
    Transfer,
}

/// Why points moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ask,
    Offer,
    Event,
    Content,
    Daily,
    Transfer,
}

/// Lifecycle of a transaction. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    #[default]
    Completed,
    Failed,
    Refunded,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    /// Only `pending -> completed | failed | refunded` is allowed.
    pub fn can_transition_to(self, next: TxStatus) -> bool {
        self == TxStatus::Pending && next.is_terminal()
    }
}

macro_rules! str_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(other.to_string()),
                }
            }
        }
    };
}

str_enum!(TransactionKind {
    Earned => "earned",
    Spent => "spent",
    Transfer => "transfer",
});

str_enum!(Category {
    Ask => "ask",
    Offer => "offer",
    Event => "event",
    Content => "content",
    Daily => "daily",
    Transfer => "transfer",
});

str_enum!(TxStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Refunded => "refunded",
});

/// Optional links from a transaction to the thing it paid for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<PostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl Metadata {
    pub fn for_post(post_id: PostId) -> Self {
        Self {
            post_id: Some(post_id),
            ..Self::default()
        }
    }
}

/// Which side of a transaction a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// An immutable record of a point movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    /// `None` for platform grants.
    pub sender: Option<UserId>,
    /// `None` for spends paid to the platform.
    pub recipient: Option<UserId>,
    pub amount: Points,
    pub kind: TransactionKind,
    pub category: Category,
    pub description: String,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub idempotency_key: IdempotencyKey,
}

impl Transaction {
    pub fn involves(&self, user: UserId) -> bool {
        self.sender == Some(user) || self.recipient == Some(user)
    }

    /// Direction of this transaction from `user`'s point of view.
    pub fn direction_for(&self, user: UserId) -> Option<Direction> {
        if self.recipient == Some(user) {
            Some(Direction::Incoming)
        } else if self.sender == Some(user) {
            Some(Direction::Outgoing)
        } else {
            None
        }
    }
}

/// The slice of a user row the ledger depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub ki_points: Points,
}
