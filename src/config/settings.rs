//! User settings for the cashflow ledger
//!
//! Sizing hints for new ledgers, the rule file location and whether
//! saved ledgers are built with a category index.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::paths::CashflowPaths;
use crate::error::{CashflowError, CashflowResult};
use crate::models::ledger::{MIN_NOTE_CAPACITY, MIN_ROW_CAPACITY};
use crate::storage::file_io::write_json_atomic;

/// User settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Row capacity a rebuilt ledger starts with
    #[serde(default = "default_initial_row_capacity")]
    pub initial_row_capacity: usize,

    /// Note arena capacity a rebuilt ledger starts with
    #[serde(default = "default_initial_note_bytes")]
    pub initial_note_bytes: usize,

    /// Rule file to use instead of `rules.yaml` in the base directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,

    /// Give ledgers built by `LedgerFileService::build_bundle` a category index
    #[serde(default)]
    pub enable_category_index: bool,
}

fn default_schema_version() -> u32 {
    1
}

fn default_initial_row_capacity() -> usize {
    32
}

fn default_initial_note_bytes() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            initial_row_capacity: default_initial_row_capacity(),
            initial_note_bytes: default_initial_note_bytes(),
            rules_file: None,
            enable_category_index: false,
        }
    }
}

impl Settings {
    /// Load settings from disk, or default settings if the file doesn't exist
    pub fn load_or_create(paths: &CashflowPaths) -> CashflowResult<Self> {
        let settings_path = paths.settings_file();

        if !settings_path.exists() {
            // Not persisted until the caller saves
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(&settings_path)
            .map_err(|e| CashflowError::Io(format!("Failed to read settings file: {}", e)))?;

        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| CashflowError::Config(format!("Failed to parse settings file: {}", e)))?;

        debug!(path = %settings_path.display(), "loaded settings");
        Ok(settings)
    }

    /// Save settings to disk atomically
    pub fn save(&self, paths: &CashflowPaths) -> CashflowResult<()> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }

    /// Rule file in effect: the override, or `rules.yaml` in the base directory
    pub fn rules_path(&self, paths: &CashflowPaths) -> PathBuf {
        match &self.rules_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => paths.base_dir().join(path),
            None => paths.rules_file(),
        }
    }

    /// Row capacity for a ledger expected to hold `rows` rows
    pub fn row_capacity_for(&self, rows: usize) -> usize {
        self.initial_row_capacity.max(rows).max(MIN_ROW_CAPACITY)
    }

    /// Note arena capacity for a ledger expected to hold `rows` rows
    pub fn note_capacity_for(&self, rows: usize) -> usize {
        self.initial_note_bytes
            .max(rows.saturating_mul(16))
            .max(MIN_NOTE_CAPACITY)
    }
}
