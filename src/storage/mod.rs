//! Storage layer for the cashflow ledger
//!
//! The binary ledger format and the YAML rule file, both written through
//! atomic temp-file-and-rename helpers.

pub mod codec;
pub mod file_io;
pub mod rules_file;

pub use codec::{decode, encode, load_from_path, save_to_path, LedgerBundle};
pub use file_io::{read_json, write_bytes_atomic, write_json_atomic};
pub use rules_file::{load_rule_config, save_rule_config};
