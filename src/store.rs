//! Session-scoped cache of the signed-in user's balance and stats.
//!
//! Readers get copies. Writes go through crate-private methods called by the
//! ledger service after the backend has confirmed a change, so the cache
//! never runs ahead of the backend.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::Points;
use crate::model::{UserId, UserRecord};
use crate::stats::Stats;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no user is signed in")]
    SignedOut,
    #[error("store holds user {held}, not {requested}")]
    WrongUser { held: UserId, requested: UserId },
    #[error("delta {delta} would take balance {balance} below zero")]
    Underflow { balance: Points, delta: i64 },
}

/// Persistable copy of the store, restored on reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub profile: UserRecord,
    #[serde(default)]
    pub stats: Option<Stats>,
}

impl StoreSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Default)]
struct State {
    profile: Option<UserRecord>,
    stats: Option<Stats>,
    /// Restored from a snapshot and not yet refreshed.
    stale: bool,
}

#[derive(Debug, Default)]
pub struct BalanceStore {
    state: RwLock<State>,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current_user(&self) -> Option<UserId> {
        self.state.read().await.profile.map(|p| p.id)
    }

    pub async fn profile(&self) -> Option<UserRecord> {
        self.state.read().await.profile
    }

    pub async fn balance(&self) -> Option<Points> {
        self.state.read().await.profile.map(|p| p.ki_points)
    }

    pub async fn stats(&self) -> Option<Stats> {
        self.state.read().await.stats
    }

    pub async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }

    pub async fn snapshot(&self) -> Option<StoreSnapshot> {
        let state = self.state.read().await;
        state.profile.map(|profile| StoreSnapshot {
            profile,
            stats: state.stats,
        })
    }

    /// Load a persisted snapshot. The values are shown as-is but flagged
    /// stale until the next profile refresh.
    pub async fn restore(&self, snapshot: StoreSnapshot) {
        let mut state = self.state.write().await;
        state.profile = Some(snapshot.profile);
        state.stats = snapshot.stats;
        state.stale = true;
    }

    /// Install a freshly fetched profile. Switching users drops the previous
    /// user's stats.
    pub(crate) async fn set_profile(&self, profile: UserRecord) {
        let mut state = self.state.write().await;
        if state.profile.map(|p| p.id) != Some(profile.id) {
            state.stats = None;
        }
        state.profile = Some(profile);
        state.stale = false;
    }

    pub(crate) async fn clear(&self) {
        *self.state.write().await = State::default();
    }

    /// Store stats computed for `user`. Ignored when a different user (or
    /// nobody) is signed in by the time they arrive.
    pub(crate) async fn set_stats(&self, user: UserId, stats: Stats) -> bool {
        let mut state = self.state.write().await;
        if state.profile.map(|p| p.id) != Some(user) {
            return false;
        }
        state.stats = Some(stats);
        true
    }

    /// Replace the cached balance with one the backend confirmed.
    pub(crate) async fn apply_confirmed_balance(&self, user: UserId, balance: Points) -> bool {
        let mut state = self.state.write().await;
        match state.profile.as_mut() {
            Some(profile) if profile.id == user => {
                profile.ki_points = balance;
                true
            }
            _ => false,
        }
    }

    /// Apply a confirmed delta to the cached balance.
    pub(crate) async fn update_user_points(
        &self,
        user: UserId,
        delta: i64,
    ) -> Result<Points, StoreError> {
        let mut state = self.state.write().await;
        let profile = state.profile.as_mut().ok_or(StoreError::SignedOut)?;
        if profile.id != user {
            return Err(StoreError::WrongUser {
                held: profile.id,
                requested: user,
            });
        }

        let current = profile.ki_points;
        let magnitude = Points::new(delta.unsigned_abs());
        let updated = if delta >= 0 {
            current.checked_add(magnitude)
        } else {
            current.checked_sub(magnitude)
        };
        let updated = updated.ok_or(StoreError::Underflow {
            balance: current,
            delta,
        })?;

        profile.ki_points = updated;
        Ok(updated)
    }
}
