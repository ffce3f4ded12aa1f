use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use super::{Backend, BackendError};
use crate::Points;
use crate::engine::{Account, Engine};
use crate::entry::{EntryReceipt, EntryRequest, TransactionQuery};
use crate::model::{Transaction, TxId, TxStatus, UserId, UserRecord};

/// In-process backend over an [`Engine`].
///
/// Every call takes the engine lock for its whole duration, which makes the
/// check-debit-insert sequence of an entry indivisible across concurrent
/// callers. Reads and writes can be switched off to simulate an outage.
pub struct MemoryBackend {
    engine: Mutex<Engine>,
    reads_down: AtomicBool,
    writes_down: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::from_engine(Engine::new())
    }

    pub fn from_engine(engine: Engine) -> Self {
        Self {
            engine: Mutex::new(engine),
            reads_down: AtomicBool::new(false),
            writes_down: AtomicBool::new(false),
        }
    }

    /// Create a user row with a zero balance.
    pub async fn register(&self, user: UserId) {
        self.engine.lock().await.register(user);
    }

    /// Apply an entry with an explicit timestamp, bypassing outage switches.
    /// Used to load existing history.
    pub async fn seed(
        &self,
        entry: EntryRequest,
        at: DateTime<Utc>,
    ) -> Result<EntryReceipt, BackendError> {
        Ok(self.engine.lock().await.apply(entry, at)?)
    }

    pub async fn balance_of(&self, user: UserId) -> Option<Points> {
        self.engine
            .lock()
            .await
            .get_account(user)
            .map(Account::available)
    }

    pub async fn held_by(&self, user: UserId) -> Option<Points> {
        self.engine.lock().await.get_account(user).map(Account::held)
    }

    pub async fn transaction_count(&self) -> usize {
        self.engine.lock().await.transactions().count()
    }

    /// Sum of available and held points over all accounts.
    pub async fn points_in_circulation(&self) -> Points {
        self.engine.lock().await.accounts().map(Account::total).sum()
    }

    pub fn set_reads_available(&self, available: bool) {
        self.reads_down.store(!available, Ordering::SeqCst);
    }

    pub fn set_writes_available(&self, available: bool) {
        self.writes_down.store(!available, Ordering::SeqCst);
    }

    fn ensure_up(flag: &AtomicBool, operation: &str) -> Result<(), BackendError> {
        if flag.load(Ordering::SeqCst) {
            warn!(operation, "backend refused request");
            return Err(BackendError::Unavailable(format!(
                "{operation} refused: backend offline"
            )));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_user(&self, user: UserId) -> Result<UserRecord, BackendError> {
        Self::ensure_up(&self.reads_down, "fetch_user")?;
        let engine = self.engine.lock().await;
        let account = engine
            .get_account(user)
            .ok_or(BackendError::UserNotFound(user))?;
        Ok(UserRecord {
            id: user,
            ki_points: account.available(),
        })
    }

    async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> Result<Vec<Transaction>, BackendError> {
        Self::ensure_up(&self.reads_down, "list_transactions")?;
        Ok(self.engine.lock().await.query(&query))
    }

    async fn append_entry(&self, entry: EntryRequest) -> Result<EntryReceipt, BackendError> {
        Self::ensure_up(&self.writes_down, "append_entry")?;
        Ok(self.engine.lock().await.apply(entry, Utc::now())?)
    }

    async fn settle_entry(
        &self,
        tx: TxId,
        actor: UserId,
        status: TxStatus,
    ) -> Result<EntryReceipt, BackendError> {
        Self::ensure_up(&self.writes_down, "settle_entry")?;
        Ok(self.engine.lock().await.settle(tx, actor, status)?)
    }
}
