//! Point statistics derived from a user's transaction history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::Points;
use crate::model::{Direction, Transaction, TransactionKind, TxStatus, UserId};

/// How `transfer` rows count toward a user's stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferRule {
    /// Incoming transfers count as earned for the recipient, outgoing
    /// transfers as spent for the sender.
    #[default]
    Directional,
    /// Transfers count toward neither totals nor windows.
    Excluded,
}

impl fmt::Display for TransferRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferRule::Directional => f.write_str("directional"),
            TransferRule::Excluded => f.write_str("excluded"),
        }
    }
}

impl FromStr for TransferRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "directional" => Ok(TransferRule::Directional),
            "excluded" => Ok(TransferRule::Excluded),
            other => Err(other.to_string()),
        }
    }
}

/// Start instants of the current month, quarter and year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub month: DateTime<Utc>,
    pub quarter: DateTime<Utc>,
    pub year: DateTime<Utc>,
}

impl Windows {
    /// Windows containing `now`, with boundaries at midnight on the first
    /// day of the month in `now`'s time zone. Quarters start in January,
    /// April, July and October.
    pub fn containing<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let year = now.year();
        let month = now.month();
        let quarter_month = (now.month0() / 3) * 3 + 1;

        Self {
            month: month_start(&tz, year, month),
            quarter: month_start(&tz, year, quarter_month),
            year: month_start(&tz, year, 1),
        }
    }
}

fn month_start<Tz: TimeZone>(tz: &Tz, year: i32, month: u32) -> DateTime<Utc> {
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(start) = tz.from_local_datetime(&midnight).earliest() {
        return start.with_timezone(&Utc);
    }
    // midnight skipped by a DST jump: read it with the offset in force the
    // day before, which lands on the first instant after the gap
    let before = midnight
        .checked_sub_signed(Duration::days(1))
        .and_then(|day_before| tz.from_local_datetime(&day_before).earliest());
    match before {
        Some(before) => {
            let offset = Duration::seconds(i64::from(before.offset().fix().local_minus_utc()));
            midnight
                .checked_sub_signed(offset)
                .unwrap_or(midnight)
                .and_utc()
        }
        None => midnight.and_utc(),
    }
}

/// Aggregated point figures for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Net points since the start of the month.
    pub monthly_points: i64,
    pub quarterly_points: i64,
    pub yearly_points: i64,
    /// Lifetime points received.
    pub total_earned: Points,
    /// Lifetime points paid out.
    pub total_spent: Points,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Credit,
    Debit,
}

fn classify(tx: &Transaction, user: UserId, rule: TransferRule) -> Option<Effect> {
    match tx.kind {
        TransactionKind::Earned if tx.recipient == Some(user) => Some(Effect::Credit),
        TransactionKind::Spent if tx.sender == Some(user) => Some(Effect::Debit),
        TransactionKind::Transfer if rule == TransferRule::Directional => {
            tx.direction_for(user).map(|direction| match direction {
                Direction::Incoming => Effect::Credit,
                Direction::Outgoing => Effect::Debit,
            })
        }
        _ => None,
    }
}

impl Stats {
    /// Fold `transactions` into stats for `user`. Only completed rows count;
    /// totals cover every row, windowed figures only rows inside the window.
    pub fn fold<'a>(
        transactions: impl IntoIterator<Item = &'a Transaction>,
        user: UserId,
        windows: &Windows,
        rule: TransferRule,
    ) -> Self {
        transactions
            .into_iter()
            .fold(Stats::default(), |mut stats, tx| {
                stats.record(tx, user, windows, rule);
                stats
            })
    }

    fn record(&mut self, tx: &Transaction, user: UserId, windows: &Windows, rule: TransferRule) {
        if tx.status != TxStatus::Completed {
            return;
        }
        let Some(effect) = classify(tx, user, rule) else {
            return;
        };

        let delta = match effect {
            Effect::Credit => {
                self.total_earned = self.total_earned.saturating_add(tx.amount);
                tx.amount.as_signed()
            }
            Effect::Debit => {
                self.total_spent = self.total_spent.saturating_add(tx.amount);
                -tx.amount.as_signed()
            }
        };

        if tx.created_at >= windows.year {
            self.yearly_points = self.yearly_points.saturating_add(delta);
        }
        if tx.created_at >= windows.quarter {
            self.quarterly_points = self.quarterly_points.saturating_add(delta);
        }
        if tx.created_at >= windows.month {
            self.monthly_points = self.monthly_points.saturating_add(delta);
        }
    }
}
