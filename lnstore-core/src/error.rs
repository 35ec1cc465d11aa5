//! Error types for paged LN store operations

use crate::KeyType;
use thiserror::Error;

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Table {table} is not installed")]
    NotInstalled { table: String },

    #[error("Unique index {index} violated by walk {walk}")]
    UniqueViolation { index: String, walk: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Validation errors, raised before any mutation reaches the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Duplicate key: walk {walk} already exists")]
    DuplicateKey { walk: String },

    #[error("Type mismatch at {level}: expected {expected}, got {got}")]
    TypeMismatch {
        level: String,
        expected: KeyType,
        got: KeyType,
    },

    #[error("Malformed trie at depth {depth} (walk {path}): {reason}")]
    MalformedTrie {
        depth: usize,
        path: String,
        reason: String,
    },

    #[error("Invalid key at {level}: {reason}")]
    InvalidKeyAtLevel { level: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },
}

/// Master error type for all lnstore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LnError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LnError {
    /// Build a `MalformedTrie` validation error.
    pub fn malformed(depth: usize, path: impl Into<String>, reason: impl Into<String>) -> Self {
        LnError::Validation(ValidationError::MalformedTrie {
            depth,
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// True for the `DuplicateKey` rejection of an add.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            LnError::Validation(ValidationError::DuplicateKey { .. })
        )
    }

    /// True for any `MalformedTrie` rejection.
    pub fn is_malformed_trie(&self) -> bool {
        matches!(
            self,
            LnError::Validation(ValidationError::MalformedTrie { .. })
        )
    }
}

/// Result type alias for lnstore operations.
pub type LnResult<T> = Result<T, LnError>;

// =============================================================================
// TESTS
// =============================================================================
