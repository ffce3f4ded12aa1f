use super::EngineError;
use crate::Points;
use crate::model::UserId;

/// A user's ledger account: spendable points, points escrowed in pending
/// transfers, and lifetime totals.
#[derive(Debug, Clone)]
pub struct Account {
    id: UserId,
    available: Points,
    held: Points,
    earned: Points,
    spent: Points,
}

impl Account {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            available: Points::ZERO,
            held: Points::ZERO,
            earned: Points::ZERO,
            spent: Points::ZERO,
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    /// The user's `ki_points` balance.
    pub fn available(&self) -> Points {
        self.available
    }

    pub fn held(&self) -> Points {
        self.held
    }

    pub fn total(&self) -> Points {
        self.available.saturating_add(self.held)
    }

    /// Lifetime points received.
    pub fn earned(&self) -> Points {
        self.earned
    }

    /// Lifetime points paid out, escrow excluded until it settles.
    pub fn spent(&self) -> Points {
        self.spent
    }

    /// Whether `amount` can be credited without `available + held` or the
    /// lifetime total overflowing.
    pub fn can_receive(&self, amount: Points) -> bool {
        let total = self.available.checked_add(self.held);
        total.and_then(|t| t.checked_add(amount)).is_some()
            && self.earned.checked_add(amount).is_some()
    }

    pub(super) fn credit(&mut self, amount: Points) -> Result<(), EngineError> {
        if !self.can_receive(amount) {
            return Err(EngineError::Overflow(self.id));
        }
        self.available += amount;
        self.earned += amount;
        Ok(())
    }

    /// Conditional debit: refuses to take the balance below zero.
    pub(super) fn debit(&mut self, amount: Points) -> Result<(), EngineError> {
        self.available = self.take(amount)?;
        self.spent = self.spent.saturating_add(amount);
        Ok(())
    }

    /// Move points from available into escrow, with the same condition as
    /// [`Account::debit`].
    pub(super) fn hold(&mut self, amount: Points) -> Result<(), EngineError> {
        self.available = self.take(amount)?;
        self.held += amount;
        Ok(())
    }

    /// Return escrowed points to available.
    pub(super) fn release(&mut self, amount: Points) -> Result<(), EngineError> {
        let available = self
            .available
            .checked_add(amount)
            .ok_or(EngineError::Overflow(self.id))?;
        self.held = self.held.checked_sub(amount).unwrap_or(Points::ZERO);
        self.available = available;
        Ok(())
    }

    /// Escrowed points leave the account for good.
    pub(super) fn settle_held(&mut self, amount: Points) {
        self.held = self.held.checked_sub(amount).unwrap_or(Points::ZERO);
        self.spent = self.spent.saturating_add(amount);
    }

    fn take(&self, amount: Points) -> Result<Points, EngineError> {
        self.available
            .checked_sub(amount)
            .ok_or(EngineError::InsufficientFunds {
                user: self.id,
                available: self.available,
                requested: amount,
            })
    }
}
