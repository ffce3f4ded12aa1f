use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::engine::Account;
use crate::points::PointsError;
use crate::{Category, EntryRequest, IdempotencyKey, Points, TransactionKind, UserId};

const IMPORTED: &str = "imported";

/// Errors that can occur when reading entry rows or writing accounts
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized entry type '{entry_type}'")]
    UnrecognizedType { line: usize, entry_type: String },

    #[error("line {line}: {kind} missing amount")]
    MissingAmount { line: usize, kind: TransactionKind },

    #[error("line {line}: {source}")]
    InvalidAmount { line: usize, source: PointsError },

    #[error("line {line}: {kind} missing {party}")]
    MissingParty {
        line: usize,
        kind: TransactionKind,
        party: &'static str,
    },

    #[error("line {line}: {kind} must not have a {party}")]
    UnexpectedParty {
        line: usize,
        kind: TransactionKind,
        party: &'static str,
    },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    sender: Option<UserId>,
    recipient: Option<UserId>,
    amount: Option<String>,
    category: Option<Category>,
    key: Option<IdempotencyKey>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    balance: Points,
    held: Points,
    earned: Points,
    spent: Points,
}

impl InputRow {
    fn into_entry(self, line: usize) -> Result<EntryRequest, CsvError> {
        let kind: TransactionKind =
            self.r#type
                .parse()
                .map_err(|_| CsvError::UnrecognizedType {
                    line,
                    entry_type: self.r#type.clone(),
                })?;
        let amount = self
            .amount
            .filter(|a| !a.trim().is_empty())
            .ok_or(CsvError::MissingAmount { line, kind })?;
        let amount: Points = amount
            .parse()
            .map_err(|source| CsvError::InvalidAmount { line, source })?;

        let missing = |party| CsvError::MissingParty { line, kind, party };
        let unexpected = |party| CsvError::UnexpectedParty { line, kind, party };

        let entry = match kind {
            TransactionKind::Earned => {
                if self.sender.is_some() {
                    return Err(unexpected("sender"));
                }
                let recipient = self.recipient.ok_or_else(|| missing("recipient"))?;
                let category = self.category.unwrap_or(Category::Daily);
                EntryRequest::earned(recipient, amount, category, IMPORTED)
            }
            TransactionKind::Spent => {
                if self.recipient.is_some() {
                    return Err(unexpected("recipient"));
                }
                let sender = self.sender.ok_or_else(|| missing("sender"))?;
                let category = self.category.unwrap_or(Category::Event);
                EntryRequest::spent(sender, amount, category, IMPORTED)
            }
            TransactionKind::Transfer => {
                let sender = self.sender.ok_or_else(|| missing("sender"))?;
                let recipient = self.recipient.ok_or_else(|| missing("recipient"))?;
                let entry = EntryRequest::transfer(sender, recipient, amount, IMPORTED);
                match self.category {
                    Some(category) => entry.with_category(category),
                    None => entry,
                }
            }
        };

        Ok(match self.key {
            Some(key) => entry.with_key(key),
            None => entry,
        })
    }
}

/// Read ledger entries from a csv file
pub fn read_entries(
    path: &Path,
) -> Result<impl Iterator<Item = Result<EntryRequest, CsvError>> + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_entry(line)
        }))
}

/// Write accounts in csv format, ordered by user id
pub fn write_accounts<'a>(
    writer: impl io::Write,
    accounts: impl IntoIterator<Item = &'a Account>,
) -> Result<(), CsvError> {
    let mut rows: Vec<OutputRow> = accounts
        .into_iter()
        .map(|account| OutputRow {
            user: account.id(),
            balance: account.available(),
            held: account.held(),
            earned: account.earned(),
            spent: account.spent(),
        })
        .collect();
    rows.sort_by_key(|row| row.user);

    let mut writer = csv::Writer::from_writer(writer);
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
