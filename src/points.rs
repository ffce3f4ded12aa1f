use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whole number of Ki points. Balances can never go below zero, so the
/// inner value is unsigned; net figures use `i64` instead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Points(u64);

/// Rejected point amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointsError {
    #[error("amount must be a positive number of points, got {0}")]
    NotPositive(i64),
    #[error("amount '{0}' is not a whole number of points")]
    Malformed(String),
}

impl Points {
    pub const ZERO: Points = Points(0);

    pub const fn new(value: u64) -> Self {
        Points(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Validate an amount requested for a point movement. Only strictly
    /// positive amounts can move.
    pub fn positive(value: i64) -> Result<Self, PointsError> {
        if value <= 0 {
            return Err(PointsError::NotPositive(value));
        }
        Ok(Points(value as u64))
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Points)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Points)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Points(self.0.saturating_add(rhs.0))
    }

    /// Signed view used by the stats windows, clamped at `i64::MAX`.
    pub fn as_signed(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl FromStr for Points {
    type Err = PointsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: i64 = trimmed
            .parse()
            .map_err(|_| PointsError::Malformed(trimmed.to_string()))?;
        Points::positive(value)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Points {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Points(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Points {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Points {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Points::ZERO, Points::saturating_add)
    }
}
