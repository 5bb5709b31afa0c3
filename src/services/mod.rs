//! Service layer for the cashflow ledger
//!
//! Business logic on top of the models and storage: classifying statement
//! rows, importing statements, and editing and saving monthly workspaces.

pub mod import;
pub mod ledger_file;
pub mod rule_engine;
pub mod taxonomy;

pub use import::{
    filter_from_last_date, BillImporter, BillParser, Column, ColumnMapping, CsvBillParser,
    ImportReport,
};
pub use ledger_file::{LedgerFileService, Workspace};
pub use rule_engine::{classify, AmountExpr, AmountOp, Outcome, RuleEngine};
pub use taxonomy::TaxonomyService;
