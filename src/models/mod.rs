//! Core data models for the cashflow ledger
//!
//! The columnar monthly ledger and its category index, the category taxonomy,
//! transaction value records, money and rule configuration shapes.

pub mod category_index;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod rule;
pub mod taxonomy;
pub mod transaction;

pub use category_index::CategoryIndex;
pub use ids::{CategoryId, SubCategoryId};
pub use ledger::{EntryView, LedgerColumns, MonthlyLedger, RawColumns};
pub use money::Money;
pub use rule::{NoteReplace, RuleConfig, RuleDef, RuleDefaults, TextMatch, Then, When};
pub use taxonomy::Taxonomy;
pub use transaction::{FinalTransaction, LedgerEntry, NoteSource, UnifiedTransaction};
