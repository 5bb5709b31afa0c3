//! Transaction value records
//!
//! A statement parser yields [`UnifiedTransaction`]s, the rule engine turns
//! them into [`FinalTransaction`]s, and the working set of an open ledger is a
//! list of [`LedgerEntry`] rows carrying category names rather than ids.

use serde::{Deserialize, Serialize};

use super::money::Money;

/// Parser-agnostic transaction as read from a bank or payment statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedTransaction {
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    /// Signed minor units (positive = income)
    pub amount: Money,
    /// Counterparty
    pub payee: String,
    /// Item or goods description
    pub item: String,
    /// Free-text note
    pub note: String,
}

impl UnifiedTransaction {
    pub fn new(
        timestamp_ms: i64,
        amount: Money,
        payee: impl Into<String>,
        item: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            amount,
            payee: payee.into(),
            item: item.into(),
            note: note.into(),
        }
    }

    /// Source text for a fallback-order field name
    pub fn field(&self, field: NoteSource) -> &str {
        match field {
            NoteSource::Note => &self.note,
            NoteSource::Item => &self.item,
            NoteSource::Payee => &self.payee,
        }
    }
}

/// Fields a resolved note may fall back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSource {
    Note,
    Item,
    Payee,
}

/// Classified transaction ready to enter a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalTransaction {
    pub timestamp_ms: i64,
    pub amount: Money,
    pub category: String,
    pub sub_category: String,
    pub note: String,
}

/// One editable row of an open ledger, identified by names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp_ms: i64,
    pub amount: Money,
    pub category: String,
    pub sub_category: String,
    #[serde(default)]
    pub note: String,
}

impl LedgerEntry {
    pub fn new(
        timestamp_ms: i64,
        amount: Money,
        category: impl Into<String>,
        sub_category: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            amount,
            category: category.into(),
            sub_category: sub_category.into(),
            note: note.into(),
        }
    }
}

impl From<FinalTransaction> for LedgerEntry {
    fn from(txn: FinalTransaction) -> Self {
        Self {
            timestamp_ms: txn.timestamp_ms,
            amount: txn.amount,
            category: txn.category,
            sub_category: txn.sub_category,
            note: txn.note,
        }
    }
}
