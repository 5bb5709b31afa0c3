//! Configuration module for the cashflow ledger
//!
//! This module provides configuration management including:
//! - Platform path resolution for ledgers, rules and settings
//! - User settings persistence

pub mod paths;
pub mod settings;

pub use paths::CashflowPaths;
pub use settings::Settings;
