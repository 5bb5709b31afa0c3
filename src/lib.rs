//! cashflow-ledger - monthly personal cash-flow ledgers
//!
//! This library stores one month of income and expense entries in a compact
//! columnar ledger, persists it together with its category taxonomy in a
//! versioned binary file, and classifies imported statement rows with an
//! ordered When/Then rule configuration.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `models`: Ledger, taxonomy, transactions, money and rule shapes
//! - `storage`: Binary ledger codec, rule file and atomic file I/O
//! - `services`: Rule engine, statement import, workspace and taxonomy editing
//!
//! # Example
//!
//! ```rust,ignore
//! use cashflow_ledger::config::{CashflowPaths, Settings};
//! use cashflow_ledger::services::{BillImporter, LedgerFileService};
//! use cashflow_ledger::storage::load_rule_config;
//!
//! let paths = CashflowPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let rules = load_rule_config(settings.rules_path(&paths))?;
//!
//! let files = LedgerFileService::new(&settings);
//! let mut workspace = files.open(paths.ledger_file(2025, 1))?;
//! BillImporter::with_builtin_parsers().import_into("wechat.csv", &rules, &mut workspace)?;
//! files.save(&mut workspace)?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{CashflowError, CashflowResult};
