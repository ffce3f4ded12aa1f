pub mod backend;
pub mod config;
pub mod csv;
pub mod engine;
pub mod entry;
pub mod error;
pub mod ledger;
pub mod model;
pub mod points;
pub mod posts;
pub mod stats;
pub mod store;

pub use backend::{Backend, BackendError, MemoryBackend};
pub use config::LedgerConfig;
pub use engine::Engine;
pub use entry::{Cursor, EntryReceipt, EntryRequest, TransactionQuery};
pub use error::LedgerError;
pub use ledger::{KiLedger, TransferDraft};
pub use model::{
    Category, IdempotencyKey, Metadata, PostId, Transaction, TransactionKind, TxId, TxStatus,
    UserId, UserRecord,
};
pub use points::Points;
pub use posts::{Post, PostKind, PostStatus};
pub use stats::{Stats, TransferRule};
pub use store::BalanceStore;
