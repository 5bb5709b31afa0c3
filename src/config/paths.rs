//! Path management for the cashflow ledger
//!
//! The base directory is the platform config directory reported by
//! `directories` (`~/.config/cashflow-ledger` on Linux,
//! `%APPDATA%\cashflow\cashflow-ledger\config` on Windows), or whatever the
//! host passes to [`CashflowPaths::with_base_dir`].

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{CashflowError, CashflowResult};

/// Manages all paths used by the cashflow ledger
#[derive(Debug, Clone)]
pub struct CashflowPaths {
    base_dir: PathBuf,
}

impl CashflowPaths {
    /// Resolve the base directory from the platform
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> CashflowResult<Self> {
        let base_dir = ProjectDirs::from("", "cashflow", "cashflow-ledger")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| CashflowError::Config("Could not determine a home directory".into()))?;

        Ok(Self { base_dir })
    }

    /// Create paths under a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding one ledger file per month
    pub fn ledgers_dir(&self) -> PathBuf {
        self.base_dir.join("ledgers")
    }

    /// Default rule configuration file
    pub fn rules_file(&self) -> PathBuf {
        self.base_dir.join("rules.yaml")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Conventional ledger file for a month: `ledgers/YYYY-MM.mld`
    pub fn ledger_file(&self, year: i32, month: u32) -> PathBuf {
        self.ledgers_dir().join(format!("{:04}-{:02}.mld", year, month))
    }

    /// Ensure the base and ledger directories exist
    pub fn ensure_directories(&self) -> CashflowResult<()> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| CashflowError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.ledgers_dir())
            .map_err(|e| CashflowError::Io(format!("Failed to create ledger directory: {}", e)))?;

        Ok(())
    }

    /// Check if settings have ever been saved
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}
