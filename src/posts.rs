//! Asks and offers priced in Ki points.
//!
//! A post moves `open -> in_progress` when a response is accepted and the
//! payer's points go into escrow, then `completed` when the escrow is paid
//! out or `cancelled` when it is refunded. Who pays depends on the kind:
//! the author of an ask pays whoever helps; whoever takes up an offer pays
//! its author.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Points;
use crate::model::{Category, PostId, TxId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Ask,
    Offer,
}

impl PostKind {
    pub fn category(self) -> Category {
        match self {
            PostKind::Ask => Category::Ask,
            PostKind::Offer => Category::Offer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PostStatus::Open => "open",
            PostStatus::InProgress => "in progress",
            PostStatus::Completed => "completed",
            PostStatus::Cancelled => "cancelled",
        })
    }
}

/// An accepted response and the escrow backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    pub responder: UserId,
    pub payer: UserId,
    pub provider: UserId,
    pub settlement: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author: UserId,
    pub kind: PostKind,
    pub title: String,
    pub ki_points: Points,
    status: PostStatus,
    acceptance: Option<Acceptance>,
}

impl Post {
    pub fn new(author: UserId, kind: PostKind, title: impl Into<String>, ki_points: Points) -> Self {
        Self {
            id: PostId::new(),
            author,
            kind,
            title: title.into(),
            ki_points,
            status: PostStatus::Open,
            acceptance: None,
        }
    }

    pub fn status(&self) -> PostStatus {
        self.status
    }

    pub fn acceptance(&self) -> Option<&Acceptance> {
        self.acceptance.as_ref()
    }

    /// `(payer, provider)` if `responder`'s response were accepted.
    pub fn parties(&self, responder: UserId) -> (UserId, UserId) {
        match self.kind {
            PostKind::Ask => (self.author, responder),
            PostKind::Offer => (responder, self.author),
        }
    }

    pub(crate) fn accept(&mut self, acceptance: Acceptance) {
        self.acceptance = Some(acceptance);
        self.status = PostStatus::InProgress;
    }

    pub(crate) fn close(&mut self, status: PostStatus) {
        self.status = status;
    }
}
