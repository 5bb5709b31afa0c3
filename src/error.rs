//! Custom error types for the cashflow ledger
//!
//! Every failure a host UI may want to present differently gets its own variant:
//! taxonomy structure problems, missing rows, malformed or unsupported ledger
//! files and broken rule configuration are all distinct.

use thiserror::Error;

/// The main error type for ledger operations
#[derive(Error, Debug)]
pub enum CashflowError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Validation errors for data models
    #[error("Validation error: {0}")]
    Validation(String),

    /// Structural taxonomy errors (mismatched lists, duplicates, empty categories)
    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// The ledger file is not a well-formed ledger
    #[error("Invalid ledger file: {0}")]
    InvalidFormat(String),

    /// The ledger file uses a format version this build cannot read
    #[error("Unsupported ledger version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Rule configuration could not be compiled or evaluated
    #[error("Rule configuration error: {0}")]
    RuleConfig(String),

    /// Import errors
    #[error("Import error: {0}")]
    Import(String),
}

impl CashflowError {
    /// Create a "not found" error for ledger rows
    pub fn row_not_found(row: usize) -> Self {
        Self::NotFound {
            entity_type: "Row",
            identifier: row.to_string(),
        }
    }

    /// Create a "not found" error for categories
    pub fn category_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Category",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for subcategories
    pub fn subcategory_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Subcategory",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if the ledger file was rejected as malformed or unsupported
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormat(_) | Self::UnsupportedVersion { .. }
        )
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for CashflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CashflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for CashflowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<csv::Error> for CashflowError {
    fn from(err: csv::Error) -> Self {
        Self::Import(err.to_string())
    }
}

/// Result type alias for ledger operations
pub type CashflowResult<T> = Result<T, CashflowError>;
