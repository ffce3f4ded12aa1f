//! Ki points service used by the UI.
//!
//! Every balance-changing operation is one atomic backend entry. The local
//! [`BalanceStore`] is only written after the backend confirms, using the
//! balance the backend reports, and stats are refreshed afterwards.

use std::sync::Arc;

use chrono::{Duration, Local, Utc};
use tracing::{info, warn};

use crate::Points;
use crate::backend::Backend;
use crate::config::LedgerConfig;
use crate::entry::{Cursor, EntryReceipt, EntryRequest, TransactionQuery};
use crate::error::LedgerError;
use crate::model::{
    Category, Direction, IdempotencyKey, Metadata, Transaction, TxId, TxStatus, UserId, UserRecord,
};
use crate::posts::{Acceptance, Post, PostStatus};
use crate::stats::{Stats, Windows};
use crate::store::BalanceStore;

/// A transfer ready to be submitted. Keep the draft (or its key) around to
/// retry a submission whose outcome is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDraft {
    pub recipient: UserId,
    pub amount: i64,
    pub description: String,
    pub metadata: Option<Metadata>,
    pub idempotency_key: IdempotencyKey,
}

impl TransferDraft {
    pub fn new(recipient: UserId, amount: i64, description: impl Into<String>) -> Self {
        Self {
            recipient,
            amount,
            description: description.into(),
            metadata: None,
            idempotency_key: IdempotencyKey::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = key;
        self
    }
}

/// The Ki points service for one client session.
pub struct KiLedger<B> {
    backend: Arc<B>,
    store: BalanceStore,
    config: LedgerConfig,
}

impl<B: Backend> KiLedger<B> {
    pub fn new(backend: Arc<B>, config: LedgerConfig) -> Self {
        Self {
            backend,
            store: BalanceStore::new(),
            config,
        }
    }

    pub fn store(&self) -> &BalanceStore {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // Session

    /// Load `user`'s profile and make them the signed-in user.
    pub async fn sign_in(&self, user: UserId) -> Result<UserRecord, LedgerError> {
        let profile = self.fetch_profile(user).await?;
        self.store.set_profile(profile).await;
        info!(user = %user, balance = %profile.ki_points, "signed in");
        Ok(profile)
    }

    pub async fn sign_out(&self) {
        self.store.clear().await;
    }

    pub async fn current_user(&self) -> Option<UserRecord> {
        self.store.profile().await
    }

    /// Re-read the signed-in user's profile from the backend.
    pub async fn refresh_profile(&self) -> Result<UserRecord, LedgerError> {
        let user = self.require_user().await?;
        let profile = self.fetch_profile(user).await?;
        self.store.set_profile(profile).await;
        Ok(profile)
    }

    // Transfers

    /// Whether the signed-in user's balance, freshly read from the backend,
    /// covers `amount`. Returns `false` whenever that cannot be shown.
    ///
    /// This is advisory: the balance can change before a transfer is
    /// submitted, and the backend re-checks atomically on write.
    pub async fn validate_transfer(&self, amount: i64) -> bool {
        let Some(user) = self.store.current_user().await else {
            return false;
        };
        let Ok(amount) = Points::positive(amount) else {
            return false;
        };
        match self.backend.fetch_user(user).await {
            Ok(record) => record.ki_points >= amount,
            Err(e) => {
                warn!(user = %user, reason = %e, "balance check failed, blocking transfer");
                false
            }
        }
    }

    /// Send `amount` points from the signed-in user to `recipient`.
    pub async fn transfer_points(
        &self,
        recipient: UserId,
        amount: i64,
        description: &str,
        metadata: Option<Metadata>,
    ) -> Result<Transaction, LedgerError> {
        let mut draft = TransferDraft::new(recipient, amount, description);
        draft.metadata = metadata;
        self.submit_transfer(draft).await
    }

    /// Submit a transfer draft. Submitting the same draft again returns the
    /// transaction recorded the first time without moving points again.
    pub async fn submit_transfer(&self, draft: TransferDraft) -> Result<Transaction, LedgerError> {
        let sender = self.require_user().await?;
        let amount = Self::parse_amount(draft.amount)?;
        if draft.recipient == sender {
            return Err(LedgerError::SelfTransfer);
        }
        let description = Self::require_description(&draft.description)?;

        let entry = EntryRequest::transfer(sender, draft.recipient, amount, description)
            .with_key(draft.idempotency_key)
            .with_metadata(draft.metadata);

        let receipt = self.commit(sender, entry).await?;
        Ok(receipt.transaction)
    }

    /// Credit the signed-in user with points earned on the platform.
    pub async fn record_earning(
        &self,
        amount: i64,
        category: Category,
        description: &str,
        metadata: Option<Metadata>,
    ) -> Result<Transaction, LedgerError> {
        let user = self.require_user().await?;
        let amount = Self::parse_amount(amount)?;
        let description = Self::require_description(description)?;

        let entry =
            EntryRequest::earned(user, amount, category, description).with_metadata(metadata);
        Ok(self.commit(user, entry).await?.transaction)
    }

    /// Pay points from the signed-in user to the platform.
    pub async fn record_spend(
        &self,
        amount: i64,
        category: Category,
        description: &str,
        metadata: Option<Metadata>,
    ) -> Result<Transaction, LedgerError> {
        let user = self.require_user().await?;
        let amount = Self::parse_amount(amount)?;
        let description = Self::require_description(description)?;

        let entry =
            EntryRequest::spent(user, amount, category, description).with_metadata(metadata);
        Ok(self.commit(user, entry).await?.transaction)
    }

    // Reading

    /// Transactions of the signed-in user from the last `days` days, most
    /// recent first. Each call queries the backend again.
    pub async fn get_transaction_history(
        &self,
        days: u32,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let user = self.require_user().await?;
        let query = TransactionQuery::for_user(user);
        // a window reaching past the representable range has no lower bound
        let query = match Utc::now().checked_sub_signed(Duration::days(i64::from(days))) {
            Some(since) => query.since(since),
            None => query,
        };
        self.read_all(query).await
    }

    /// Recompute the signed-in user's stats from the backend and cache them.
    pub async fn fetch_stats(&self) -> Result<Stats, LedgerError> {
        let user = self.require_user().await?;
        let history = self.read_all(TransactionQuery::for_user(user)).await?;
        let windows = Windows::containing(&Local::now());
        let stats = Stats::fold(&history, user, &windows, self.config.transfer_rule);

        if !self.store.set_stats(user, stats).await {
            info!(user = %user, "session changed, dropping stats");
        }
        Ok(stats)
    }

    // Asks and offers

    /// Accept `responder`'s response to `post`. Must be called by the paying
    /// party (the author of an ask, the responder to an offer); their points
    /// go into escrow until the post is completed or cancelled.
    pub async fn accept_response(
        &self,
        post: &mut Post,
        responder: UserId,
    ) -> Result<Transaction, LedgerError> {
        let user = self.require_user().await?;
        if post.status() != PostStatus::Open {
            return Err(LedgerError::InvalidPostState {
                post: post.id,
                status: post.status(),
            });
        }
        let (payer, provider) = post.parties(responder);
        if payer == provider {
            return Err(LedgerError::SelfTransfer);
        }
        if payer != user {
            return Err(LedgerError::NotPayer(post.id));
        }
        let amount = Self::parse_amount(post.ki_points.as_signed())?;
        let title = Self::require_description(&post.title)?;

        let entry = EntryRequest::transfer(payer, provider, amount, title)
            .with_category(post.kind.category())
            .with_metadata(Some(Metadata::for_post(post.id)))
            .pending();
        let receipt = self.commit(user, entry).await?;

        post.accept(Acceptance {
            responder,
            payer,
            provider,
            settlement: receipt.transaction.id,
        });
        Ok(receipt.transaction)
    }

    /// Pay the escrow of an in-progress post to its provider.
    pub async fn complete_post(&self, post: &mut Post) -> Result<Transaction, LedgerError> {
        let tx = self.settle_post(post, TxStatus::Completed).await?;
        post.close(PostStatus::Completed);
        Ok(tx)
    }

    /// Refund the escrow of an in-progress post to its payer.
    pub async fn cancel_post(&self, post: &mut Post) -> Result<Transaction, LedgerError> {
        let tx = self.settle_post(post, TxStatus::Refunded).await?;
        post.close(PostStatus::Cancelled);
        Ok(tx)
    }
}

/// Private API
impl<B: Backend> KiLedger<B> {
    async fn require_user(&self) -> Result<UserId, LedgerError> {
        self.store
            .current_user()
            .await
            .ok_or(LedgerError::NotAuthenticated)
    }

    fn parse_amount(amount: i64) -> Result<Points, LedgerError> {
        Points::positive(amount).map_err(|e| LedgerError::InvalidAmount(e.to_string()))
    }

    fn require_description(description: &str) -> Result<&str, LedgerError> {
        let trimmed = description.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::EmptyDescription);
        }
        Ok(trimmed)
    }

    async fn fetch_profile(&self, user: UserId) -> Result<UserRecord, LedgerError> {
        self.backend.fetch_user(user).await.map_err(|e| {
            warn!(user = %user, reason = %e, "failed to load profile");
            LedgerError::from_read(e)
        })
    }

    /// Page through `query` until the backend returns a short page. Each
    /// page starts after the last row of the previous one.
    async fn read_all(&self, query: TransactionQuery) -> Result<Vec<Transaction>, LedgerError> {
        let page_size = self.config.history_page_size.max(1);
        let mut query = query.page(page_size, 0);
        let mut rows = Vec::new();
        loop {
            let page = self
                .backend
                .list_transactions(query)
                .await
                .map_err(|e| {
                    warn!(user = %query.user, reason = %e, "failed to read transactions");
                    LedgerError::from_read(e)
                })?;
            let done = page.len() < page_size;
            if let Some(last) = page.last() {
                query = query.before(Cursor::of(last));
            }
            rows.extend(page);
            if done {
                return Ok(rows);
            }
        }
    }

    /// Apply one entry on the backend, then bring the local cache in line
    /// with what the backend confirmed.
    async fn commit(&self, user: UserId, entry: EntryRequest) -> Result<EntryReceipt, LedgerError> {
        let kind = entry.kind;
        let amount = entry.amount;
        let receipt = self.backend.append_entry(entry).await.map_err(|e| {
            warn!(user = %user, amount = %amount, reason = %e, "{kind} rejected");
            LedgerError::from_write(e)
        })?;

        self.apply_receipt(user, &receipt).await;
        info!(
            user = %user,
            tx = %receipt.transaction.id,
            amount = %amount,
            replayed = receipt.replayed,
            "{kind} committed"
        );
        self.refresh_stats_after_write(user).await;
        Ok(receipt)
    }

    async fn settle_post(&self, post: &Post, status: TxStatus) -> Result<Transaction, LedgerError> {
        let user = self.require_user().await?;
        let acceptance = match (post.status(), post.acceptance()) {
            (PostStatus::InProgress, Some(acceptance)) => *acceptance,
            (status, _) => {
                return Err(LedgerError::InvalidPostState {
                    post: post.id,
                    status,
                });
            }
        };
        if acceptance.payer != user {
            return Err(LedgerError::NotPayer(post.id));
        }

        let receipt = self.settle(user, acceptance.settlement, status).await?;
        Ok(receipt.transaction)
    }

    async fn settle(
        &self,
        user: UserId,
        tx: TxId,
        status: TxStatus,
    ) -> Result<EntryReceipt, LedgerError> {
        let receipt = self
            .backend
            .settle_entry(tx, user, status)
            .await
            .map_err(|e| {
                warn!(user = %user, tx = %tx, reason = %e, "settlement to {status} rejected");
                LedgerError::from_write(e)
            })?;

        match receipt.balance_of(user) {
            Some(balance) => {
                self.store.apply_confirmed_balance(user, balance).await;
            }
            None => {
                if let Err(e) = self.refresh_profile().await {
                    warn!(user = %user, reason = %e, "profile refresh after settlement failed");
                }
            }
        }
        self.refresh_stats_after_write(user).await;
        Ok(receipt)
    }

    /// Bring the cached balance in line with a confirmed entry. Prefers the
    /// balance reported by the backend and falls back to the entry's delta.
    async fn apply_receipt(&self, user: UserId, receipt: &EntryReceipt) {
        if let Some(balance) = receipt.balance_of(user) {
            self.store.apply_confirmed_balance(user, balance).await;
            return;
        }
        if receipt.replayed {
            return;
        }

        let tx = &receipt.transaction;
        let delta = match tx.direction_for(user) {
            Some(Direction::Incoming) if tx.status == TxStatus::Completed => tx.amount.as_signed(),
            Some(Direction::Outgoing) => -tx.amount.as_signed(),
            _ => return,
        };
        if let Err(e) = self.store.update_user_points(user, delta).await {
            warn!(user = %user, reason = %e, "cached balance out of sync, refreshing");
            if let Err(e) = self.refresh_profile().await {
                warn!(user = %user, reason = %e, "profile refresh failed");
            }
        }
    }

    async fn refresh_stats_after_write(&self, user: UserId) {
        if let Err(e) = self.fetch_stats().await {
            warn!(user = %user, reason = %e, "stats refresh failed");
        }
    }
}
