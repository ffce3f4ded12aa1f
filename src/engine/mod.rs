//! Ki points ledger engine.
//!
//! The engine is the authoritative ledger state: user accounts, the
//! append-only transaction log and the idempotency index. Every entry is
//! checked and applied as one step, so a rejected entry leaves no trace.
//! Also supports an async stream of entries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Points;
use crate::entry::{Cursor, EntryReceipt, EntryRequest, TransactionQuery};
use crate::model::{IdempotencyKey, Transaction, TransactionKind, TxId, TxStatus, UserId};

mod state;
pub use state::Account;

mod error;
pub use error::EngineError;

/// The ledger engine.
///
/// Maintains accounts, the transaction log and idempotency keys.
pub struct Engine {
    accounts: HashMap<UserId, Account>,
    /// Append-only log in application order
    log: Vec<Transaction>,
    /// Position of each transaction in `log`
    index: HashMap<TxId, usize>,
    /// Idempotency key of every recorded entry, with its initial status
    keys: HashMap<IdempotencyKey, (TxId, TxStatus)>,
}

/// Public API
impl Engine {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            log: Vec::new(),
            index: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    /// Run the engine with the given entry stream, stamping entries with the
    /// current time.
    pub async fn run(&mut self, mut stream: impl Stream<Item = EntryRequest> + Unpin) {
        while let Some(entry) = stream.next().await {
            // a rejected entry must not stop the replay
            let _ = self.apply(entry, Utc::now());
        }
    }

    /// Return all accounts.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> + '_ {
        self.accounts.values()
    }

    /// Return one account
    pub fn get_account(&self, user: UserId) -> Option<&Account> {
        self.accounts.get(&user)
    }

    /// Create an empty account if `user` has none yet.
    pub fn register(&mut self, user: UserId) -> &Account {
        self.account_mut(user)
    }

    /// Return the transaction log in application order.
    pub fn transactions(&self) -> impl DoubleEndedIterator<Item = &Transaction> + '_ {
        self.log.iter()
    }

    pub fn get_transaction(&self, id: TxId) -> Option<&Transaction> {
        self.index.get(&id).map(|&pos| &self.log[pos])
    }

    /// Select transactions matching `query`, most recent first. Entries with
    /// equal timestamps come back by descending id.
    pub fn query(&self, query: &TransactionQuery) -> Vec<Transaction> {
        let mut matching: Vec<&Transaction> =
            self.log.iter().filter(|tx| query.matches(tx)).collect();
        matching.sort_by_key(|tx| std::cmp::Reverse(Cursor::of(tx)));

        matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Apply a single entry recorded at `at`. Resubmitting an entry with an
    /// already used idempotency key returns the original record untouched.
    pub fn apply(
        &mut self,
        entry: EntryRequest,
        at: DateTime<Utc>,
    ) -> Result<EntryReceipt, EngineError> {
        let kind = entry.kind;
        let key = entry.idempotency_key;
        let amount = entry.amount;
        let result = self.apply_entry(entry, at);
        Self::log_result(kind, key, amount, &result);
        result
    }

    /// Move a pending transfer to a terminal status. `Completed` credits the
    /// recipient with the escrowed points; `Failed` and `Refunded` return
    /// them to the sender. Only the sender may settle.
    pub fn settle(
        &mut self,
        tx: TxId,
        actor: UserId,
        status: TxStatus,
    ) -> Result<EntryReceipt, EngineError> {
        let result = self.settle_entry(tx, actor, status);
        match &result {
            Ok(_) => info!(tx = %tx, actor = %actor, "settlement to {status} applied"),
            Err(e) => warn!(
                tx = %tx,
                actor = %actor,
                reason = %e,
                "settlement to {status} rejected"
            ),
        }
        result
    }
}

/// Private API
impl Engine {
    /// Small helper to log `apply` results
    fn log_result(
        kind: TransactionKind,
        key: IdempotencyKey,
        amount: Points,
        result: &Result<EntryReceipt, EngineError>,
    ) {
        match result {
            Ok(receipt) if receipt.replayed => {
                info!(
                    key = %key,
                    tx = %receipt.transaction.id,
                    amount = %amount,
                    "{kind} replayed"
                );
            }
            Ok(receipt) => {
                info!(
                    key = %key,
                    tx = %receipt.transaction.id,
                    amount = %amount,
                    "{kind} applied"
                );
            }
            Err(e) => {
                warn!(
                    key = %key,
                    amount = %amount,
                    reason = %e,
                    "{kind} rejected"
                );
            }
        }
    }

    fn account_mut(&mut self, user: UserId) -> &mut Account {
        self.accounts
            .entry(user)
            .or_insert_with(|| Account::new(user))
    }

    /// Account that must cover `amount`; an unknown user has nothing to spend.
    fn funded_account(&mut self, user: UserId, amount: Points) -> Result<&mut Account, EngineError> {
        self.accounts
            .get_mut(&user)
            .ok_or(EngineError::InsufficientFunds {
                user,
                available: Points::ZERO,
                requested: amount,
            })
    }

    fn ensure_can_receive(&self, user: UserId, amount: Points) -> Result<(), EngineError> {
        match self.accounts.get(&user) {
            Some(account) if !account.can_receive(amount) => Err(EngineError::Overflow(user)),
            _ => Ok(()),
        }
    }

    fn balance(&self, user: Option<UserId>) -> Option<Points> {
        user.and_then(|u| self.accounts.get(&u)).map(Account::available)
    }

    fn receipt(&self, transaction: Transaction, replayed: bool) -> EntryReceipt {
        EntryReceipt {
            sender_balance: self.balance(transaction.sender),
            recipient_balance: self.balance(transaction.recipient),
            transaction,
            replayed,
        }
    }

    /// Look up an earlier submission of the same entry.
    fn replay(&self, entry: &EntryRequest) -> Result<Option<EntryReceipt>, EngineError> {
        let Some(&(id, initial_status)) = self.keys.get(&entry.idempotency_key) else {
            return Ok(None);
        };
        let existing = self.get_transaction(id).ok_or(EngineError::TxNotFound(id))?;
        if !entry.is_same_entry(existing, initial_status) {
            return Err(EngineError::IdempotencyConflict(entry.idempotency_key));
        }
        Ok(Some(self.receipt(existing.clone(), true)))
    }

    fn validate(entry: &EntryRequest) -> Result<(), EngineError> {
        if entry.amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        if entry.description.trim().is_empty() {
            return Err(EngineError::EmptyDescription);
        }
        match entry.status {
            TxStatus::Completed => Ok(()),
            TxStatus::Pending if entry.kind == TransactionKind::Transfer => Ok(()),
            TxStatus::Pending => Err(EngineError::PendingNotSupported(entry.kind)),
            other => Err(EngineError::InvalidInitialStatus(other)),
        }
    }

    /// Apply an entry:
    /// - Return the original record for a replayed idempotency key
    /// - Validate amount, description, status and parties
    /// - Debit with the `available >= amount` condition, then credit
    /// - Append the transaction row
    fn apply_entry(
        &mut self,
        entry: EntryRequest,
        at: DateTime<Utc>,
    ) -> Result<EntryReceipt, EngineError> {
        if let Some(receipt) = self.replay(&entry)? {
            return Ok(receipt);
        }
        Self::validate(&entry)?;

        let amount = entry.amount;
        let pending = entry.status == TxStatus::Pending;

        use TransactionKind::{Earned, Spent, Transfer};
        match (entry.kind, entry.sender, entry.recipient) {
            (Earned, None, Some(recipient)) => {
                self.account_mut(recipient).credit(amount)?;
            }
            (Spent, Some(sender), None) => {
                self.funded_account(sender, amount)?.debit(amount)?;
            }
            (Transfer, Some(sender), Some(recipient)) if sender == recipient => {
                return Err(EngineError::SelfTransfer(sender));
            }
            (Transfer, Some(sender), Some(_)) if pending => {
                // escrowed until settled
                self.funded_account(sender, amount)?.hold(amount)?;
            }
            (Transfer, Some(sender), Some(recipient)) => {
                self.ensure_can_receive(recipient, amount)?;
                self.funded_account(sender, amount)?.debit(amount)?;
                self.account_mut(recipient).credit(amount)?;
            }
            (kind @ Transfer, _, _) | (kind, None, None) => {
                return Err(EngineError::MissingParty(kind));
            }
            (kind, _, _) => {
                return Err(EngineError::UnexpectedParty(kind));
            }
        }

        let id = TxId::new();
        let transaction = entry.into_transaction(id, at);
        self.keys
            .insert(transaction.idempotency_key, (id, transaction.status));
        self.index.insert(id, self.log.len());
        self.log.push(transaction.clone());

        Ok(self.receipt(transaction, false))
    }

    /// Settle a pending transfer:
    /// - Find the transaction and check the actor is its sender
    /// - Check `pending -> status` is a valid transition
    /// - Release escrow to the recipient or back to the sender
    /// - Update the status in place (the only mutation a record ever sees)
    fn settle_entry(
        &mut self,
        tx: TxId,
        actor: UserId,
        status: TxStatus,
    ) -> Result<EntryReceipt, EngineError> {
        let pos = *self.index.get(&tx).ok_or(EngineError::TxNotFound(tx))?;
        let record = &self.log[pos];

        if record.sender != Some(actor) {
            return Err(EngineError::NotSender { tx, actor });
        }
        if !record.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                tx,
                from: record.status,
                to: status,
            });
        }

        let amount = record.amount;
        let recipient = record
            .recipient
            .ok_or(EngineError::MissingParty(record.kind))?;

        if status == TxStatus::Completed {
            self.ensure_can_receive(recipient, amount)?;
            self.account_mut(actor).settle_held(amount);
            self.account_mut(recipient).credit(amount)?;
        } else {
            self.account_mut(actor).release(amount)?;
        }

        self.log[pos].status = status;
        Ok(self.receipt(self.log[pos].clone(), false))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use chrono::Duration;

    // test utils

    fn grant(user: UserId, amount: u64) -> EntryRequest {
        EntryRequest::earned(user, Points::new(amount), Category::Daily, "daily reward")
    }

    fn spend(user: UserId, amount: u64) -> EntryRequest {
        EntryRequest::spent(user, Points::new(amount), Category::Event, "event ticket")
    }

    fn transfer(from: UserId, to: UserId, amount: u64) -> EntryRequest {
        EntryRequest::transfer(from, to, Points::new(amount), "thanks for the help")
    }

    fn balance(engine: &Engine, user: UserId) -> Points {
        engine.get_account(user).map(Account::available).unwrap_or_default()
    }

    fn funded(amount: u64) -> (Engine, UserId) {
        let mut engine = Engine::new();
        let user = UserId::new();
        engine.apply(grant(user, amount), Utc::now()).unwrap();
        (engine, user)
    }

    #[test]
    fn new_engine() {
        let engine = Engine::new();
        assert_eq!(engine.accounts().count(), 0);
        assert_eq!(engine.transactions().count(), 0);
    }

    // Earned

    #[test]
    fn earning_creates_account_and_increases_balance() {
        let (engine, user) = funded(100);

        let account = engine.get_account(user).unwrap();
        assert_eq!(account.available(), Points::new(100));
        assert_eq!(account.held(), Points::ZERO);
        assert_eq!(account.earned(), Points::new(100));
    }

    #[test]
    fn earnings_accumulate() {
        let (mut engine, user) = funded(100);
        engine.apply(grant(user, 50), Utc::now()).unwrap();
        assert_eq!(balance(&engine, user), Points::new(150));
    }

    #[test]
    fn earning_with_sender_is_rejected() {
        let mut engine = Engine::new();
        let mut entry = grant(UserId::new(), 10);
        entry.sender = Some(UserId::new());

        let result = engine.apply(entry, Utc::now());
        assert_eq!(
            result,
            Err(EngineError::UnexpectedParty(TransactionKind::Earned))
        );
        assert_eq!(engine.transactions().count(), 0);
    }

    // Spent

    #[test]
    fn spending_decreases_balance() {
        let (mut engine, user) = funded(100);
        engine.apply(spend(user, 30), Utc::now()).unwrap();

        let account = engine.get_account(user).unwrap();
        assert_eq!(account.available(), Points::new(70));
        assert_eq!(account.spent(), Points::new(30));
    }

    #[test]
    fn spending_exact_balance_succeeds() {
        let (mut engine, user) = funded(100);
        engine.apply(spend(user, 100), Utc::now()).unwrap();
        assert_eq!(balance(&engine, user), Points::ZERO);
    }

    #[test]
    fn spending_more_than_balance_fails() {
        let (mut engine, user) = funded(100);

        let result = engine.apply(spend(user, 101), Utc::now());
        assert!(matches!(
            result,
            Err(EngineError::InsufficientFunds { user: u, .. }) if u == user
        ));

        // Balance and log unchanged
        assert_eq!(balance(&engine, user), Points::new(100));
        assert_eq!(engine.transactions().count(), 1);
    }

    #[test]
    fn spending_from_unknown_user_fails() {
        let mut engine = Engine::new();
        let user = UserId::new();

        // equivalent to an empty account
        let result = engine.apply(spend(user, 50), Utc::now());
        assert_eq!(
            result,
            Err(EngineError::InsufficientFunds {
                user,
                available: Points::ZERO,
                requested: Points::new(50),
            })
        );
        assert!(engine.get_account(user).is_none());
    }

    // Transfer

    #[test]
    fn transfer_moves_points_between_users() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();

        let receipt = engine.apply(transfer(alice, bob, 40), Utc::now()).unwrap();

        assert_eq!(receipt.sender_balance, Some(Points::new(60)));
        assert_eq!(receipt.recipient_balance, Some(Points::new(40)));
        assert_eq!(receipt.transaction.status, TxStatus::Completed);
        assert!(!receipt.replayed);
    }

    #[test]
    fn transfers_conserve_points() {
        let mut engine = Engine::new();
        let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
        for &user in &users {
            engine.apply(grant(user, 100), Utc::now()).unwrap();
        }
        let before: Points = engine.accounts().map(Account::total).sum();

        for (i, amount) in [30, 70, 10, 200, 55].into_iter().enumerate() {
            let from = users[i % users.len()];
            let to = users[(i + 1) % users.len()];
            let _ = engine.apply(transfer(from, to, amount), Utc::now());
        }

        let after: Points = engine.accounts().map(Account::total).sum();
        assert_eq!(before, after);
    }

    #[test]
    fn self_transfer_fails() {
        let (mut engine, alice) = funded(100);

        let result = engine.apply(transfer(alice, alice, 10), Utc::now());
        assert_eq!(result, Err(EngineError::SelfTransfer(alice)));
        assert_eq!(balance(&engine, alice), Points::new(100));
        assert_eq!(engine.transactions().count(), 1);
    }

    #[test]
    fn transfer_without_recipient_fails() {
        let (mut engine, alice) = funded(100);
        let mut entry = transfer(alice, UserId::new(), 10);
        entry.recipient = None;

        let result = engine.apply(entry, Utc::now());
        assert_eq!(
            result,
            Err(EngineError::MissingParty(TransactionKind::Transfer))
        );
    }

    #[test]
    fn insufficient_transfer_writes_nothing() {
        let (mut engine, alice) = funded(50);
        let bob = UserId::new();

        let result = engine.apply(transfer(alice, bob, 100), Utc::now());
        assert!(matches!(result, Err(EngineError::InsufficientFunds { .. })));
        assert_eq!(balance(&engine, alice), Points::new(50));
        assert!(engine.get_account(bob).is_none());
        assert_eq!(engine.transactions().count(), 1);
    }

    #[test]
    fn zero_amount_fails() {
        let (mut engine, alice) = funded(50);
        let result = engine.apply(transfer(alice, UserId::new(), 0), Utc::now());
        assert_eq!(result, Err(EngineError::ZeroAmount));
    }

    #[test]
    fn blank_description_fails() {
        let (mut engine, alice) = funded(50);
        let entry = EntryRequest::transfer(alice, UserId::new(), Points::new(5), "   ");
        assert_eq!(
            engine.apply(entry, Utc::now()),
            Err(EngineError::EmptyDescription)
        );
    }

    #[test]
    fn entries_cannot_start_terminal() {
        let (mut engine, alice) = funded(50);
        let mut entry = transfer(alice, UserId::new(), 5);
        entry.status = TxStatus::Refunded;
        assert_eq!(
            engine.apply(entry, Utc::now()),
            Err(EngineError::InvalidInitialStatus(TxStatus::Refunded))
        );
    }

    // Idempotency

    #[test]
    fn replayed_entry_is_not_applied_twice() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();
        let entry = transfer(alice, bob, 40);

        let first = engine.apply(entry.clone(), Utc::now()).unwrap();
        let second = engine.apply(entry, Utc::now()).unwrap();

        assert!(second.replayed);
        assert_eq!(first.transaction, second.transaction);
        assert_eq!(balance(&engine, alice), Points::new(60));
        assert_eq!(balance(&engine, bob), Points::new(40));
        assert_eq!(engine.transactions().count(), 2);
    }

    #[test]
    fn reused_key_with_different_entry_conflicts() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();
        let entry = transfer(alice, bob, 40);
        let key = entry.idempotency_key;
        engine.apply(entry, Utc::now()).unwrap();

        let result = engine.apply(transfer(alice, bob, 41).with_key(key), Utc::now());
        assert_eq!(result, Err(EngineError::IdempotencyConflict(key)));
        assert_eq!(balance(&engine, alice), Points::new(60));
    }

    #[test]
    fn escrow_key_cannot_be_reused_for_direct_transfer() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();
        let escrow = transfer(alice, bob, 30).pending();
        let key = escrow.idempotency_key;
        engine.apply(escrow.clone(), Utc::now()).unwrap();

        let mut direct = escrow.clone();
        direct.status = TxStatus::Completed;
        assert_eq!(
            engine.apply(direct, Utc::now()),
            Err(EngineError::IdempotencyConflict(key))
        );
        assert_eq!(balance(&engine, bob), Points::ZERO);
    }

    #[test]
    fn settled_escrow_still_replays_its_request() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();
        let escrow = transfer(alice, bob, 30).pending();
        let key = escrow.idempotency_key;
        let id = engine.apply(escrow.clone(), Utc::now()).unwrap().transaction.id;
        engine.settle(id, alice, TxStatus::Completed).unwrap();

        let receipt = engine.apply(escrow.clone(), Utc::now()).unwrap();
        assert!(receipt.replayed);
        assert_eq!(receipt.transaction.status, TxStatus::Completed);

        let mut direct = escrow;
        direct.status = TxStatus::Completed;
        assert_eq!(
            engine.apply(direct, Utc::now()),
            Err(EngineError::IdempotencyConflict(key))
        );
        assert_eq!(balance(&engine, bob), Points::new(30));
    }

    #[test]
    fn replay_after_failure_can_succeed() {
        let mut engine = Engine::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let entry = transfer(alice, bob, 40);

        assert!(engine.apply(entry.clone(), Utc::now()).is_err());
        engine.apply(grant(alice, 40), Utc::now()).unwrap();

        let receipt = engine.apply(entry, Utc::now()).unwrap();
        assert!(!receipt.replayed);
        assert_eq!(balance(&engine, bob), Points::new(40));
    }

    // Escrow and settlement

    #[test]
    fn pending_transfer_holds_points() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();

        let receipt = engine
            .apply(transfer(alice, bob, 30).pending(), Utc::now())
            .unwrap();

        assert_eq!(receipt.transaction.status, TxStatus::Pending);
        let account = engine.get_account(alice).unwrap();
        assert_eq!(account.available(), Points::new(70));
        assert_eq!(account.held(), Points::new(30));
        assert!(engine.get_account(bob).is_none());
    }

    #[test]
    fn pending_earning_is_rejected() {
        let mut engine = Engine::new();
        let result = engine.apply(grant(UserId::new(), 10).pending(), Utc::now());
        assert_eq!(
            result,
            Err(EngineError::PendingNotSupported(TransactionKind::Earned))
        );
    }

    #[test]
    fn completing_escrow_credits_recipient() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();
        let id = engine
            .apply(transfer(alice, bob, 30).pending(), Utc::now())
            .unwrap()
            .transaction
            .id;

        let receipt = engine.settle(id, alice, TxStatus::Completed).unwrap();

        assert_eq!(receipt.transaction.status, TxStatus::Completed);
        assert_eq!(receipt.recipient_balance, Some(Points::new(30)));
        let account = engine.get_account(alice).unwrap();
        assert_eq!(account.available(), Points::new(70));
        assert_eq!(account.held(), Points::ZERO);
        assert_eq!(account.spent(), Points::new(30));
    }

    #[test]
    fn refunding_escrow_returns_points() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();
        let id = engine
            .apply(transfer(alice, bob, 30).pending(), Utc::now())
            .unwrap()
            .transaction
            .id;

        engine.settle(id, alice, TxStatus::Refunded).unwrap();

        let account = engine.get_account(alice).unwrap();
        assert_eq!(account.available(), Points::new(100));
        assert_eq!(account.held(), Points::ZERO);
        assert_eq!(
            engine.get_transaction(id).map(|tx| tx.status),
            Some(TxStatus::Refunded)
        );
    }

    #[test]
    fn settled_transfer_cannot_be_settled_again() {
        let (mut engine, alice) = funded(100);
        let id = engine
            .apply(transfer(alice, UserId::new(), 30).pending(), Utc::now())
            .unwrap()
            .transaction
            .id;
        engine.settle(id, alice, TxStatus::Completed).unwrap();

        let result = engine.settle(id, alice, TxStatus::Refunded);
        assert_eq!(
            result,
            Err(EngineError::InvalidTransition {
                tx: id,
                from: TxStatus::Completed,
                to: TxStatus::Refunded,
            })
        );
        assert_eq!(balance(&engine, alice), Points::new(70));
    }

    #[test]
    fn only_sender_can_settle() {
        let (mut engine, alice) = funded(100);
        let bob = UserId::new();
        let id = engine
            .apply(transfer(alice, bob, 30).pending(), Utc::now())
            .unwrap()
            .transaction
            .id;

        let result = engine.settle(id, bob, TxStatus::Completed);
        assert_eq!(result, Err(EngineError::NotSender { tx: id, actor: bob }));
    }

    #[test]
    fn settle_unknown_transaction_fails() {
        let mut engine = Engine::new();
        let id = TxId::new();
        let result = engine.settle(id, UserId::new(), TxStatus::Completed);
        assert_eq!(result, Err(EngineError::TxNotFound(id)));
    }

    // Queries

    #[test]
    fn query_returns_most_recent_first() {
        let mut engine = Engine::new();
        let alice = UserId::new();
        let now = Utc::now();
        engine.apply(grant(alice, 1), now - Duration::days(3)).unwrap();
        engine.apply(grant(alice, 2), now).unwrap();
        engine.apply(grant(alice, 3), now - Duration::days(1)).unwrap();
        engine.apply(grant(UserId::new(), 4), now).unwrap();

        let amounts: Vec<u64> = engine
            .query(&TransactionQuery::for_user(alice))
            .iter()
            .map(|tx| tx.amount.get())
            .collect();
        assert_eq!(amounts, vec![2, 3, 1]);
    }

    #[test]
    fn query_applies_window_and_pagination() {
        let mut engine = Engine::new();
        let alice = UserId::new();
        let now = Utc::now();
        for amount in 1..=5 {
            let at = now - Duration::minutes(amount as i64);
            engine.apply(grant(alice, amount), at).unwrap();
        }
        engine.apply(grant(alice, 99), now - Duration::days(30)).unwrap();

        let query = TransactionQuery::for_user(alice)
            .since(now - Duration::days(7))
            .page(2, 1);
        let amounts: Vec<u64> = engine.query(&query).iter().map(|tx| tx.amount.get()).collect();
        assert_eq!(amounts, vec![2, 3]);
    }

    #[test]
    fn keyset_pages_are_stable_under_inserts() {
        let mut engine = Engine::new();
        let alice = UserId::new();
        let now = Utc::now();
        for amount in 1..=4 {
            let at = now - Duration::minutes(amount as i64);
            engine.apply(grant(alice, amount), at).unwrap();
        }
        let query = TransactionQuery::for_user(alice).page(2, 0);

        let first = engine.query(&query);
        // lands at the top of the order while the reader is between pages
        engine.apply(grant(alice, 50), now).unwrap();
        let cursor = Cursor::of(first.last().unwrap());
        let second = engine.query(&query.before(cursor));

        let amounts: Vec<u64> = first
            .iter()
            .chain(&second)
            .map(|tx| tx.amount.get())
            .collect();
        assert_eq!(amounts, vec![1, 2, 3, 4]);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let mut engine = Engine::new();
        let alice = UserId::new();
        let now = Utc::now();
        for amount in 1..=3 {
            engine.apply(grant(alice, amount), now).unwrap();
        }

        let rows = engine.query(&TransactionQuery::for_user(alice));
        let ids: Vec<TxId> = rows.iter().map(|tx| tx.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, sorted);
    }

    //  Async run()

    #[tokio::test]
    async fn run_processes_all_entries() {
        let mut engine = Engine::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let entries = vec![grant(alice, 100), grant(bob, 200), transfer(alice, bob, 25)];

        engine.run(tokio_stream::iter(entries)).await;

        assert_eq!(balance(&engine, alice), Points::new(75));
        assert_eq!(balance(&engine, bob), Points::new(225));
    }

    #[tokio::test]
    async fn run_skips_failed_entries_and_continues() {
        let mut engine = Engine::new();
        let alice = UserId::new();
        let entries = vec![
            grant(alice, 100),
            spend(alice, 200), // Should fail with insufficient funds
            grant(alice, 50),  // Should still process
        ];

        engine.run(tokio_stream::iter(entries)).await;

        assert_eq!(balance(&engine, alice), Points::new(150));
    }
}
