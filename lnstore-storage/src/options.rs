//! Call options and the input/output shapes of [`PagedStore`](crate::PagedStore).

use crate::trie::{Record, Request, Trie};
use lnstore_core::{StoreConfig, Value, Walk};
use serde_json::Map;

/// Per-store defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Validate key types and formats against the descriptor on every call
    /// that does not override it.
    pub validate: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            validate: config.validate,
        }
    }
}

/// Result format of a read, independent of the request format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultMode {
    #[default]
    Trie,
    Matrix,
    /// Matrix rows keyed by column name.
    Named,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub result: ResultMode,
    /// Overrides [`StoreOptions::validate`] for this call.
    pub validate: Option<bool>,
}

impl GetOptions {
    pub fn matrix() -> Self {
        Self {
            result: ResultMode::Matrix,
            validate: None,
        }
    }

    pub fn named() -> Self {
        Self {
            result: ResultMode::Named,
            validate: None,
        }
    }
}

/// Read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Trie(Request),
    /// Walks of length 1..=N, each asking for everything beneath its end.
    /// An empty walk asks for the whole store.
    Matrix(Vec<Walk>),
}

/// Batch add payload. Both forms must describe leaves at depth N.
#[derive(Debug, Clone, PartialEq)]
pub enum AddInput {
    Trie(Trie),
    Matrix(Vec<Record>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Trie(Trie),
    Matrix(Vec<Record>),
    Named(Vec<Map<String, Value>>),
}

impl Output {
    pub fn as_trie(&self) -> Option<&Trie> {
        match self {
            Output::Trie(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&[Record]> {
        match self {
            Output::Matrix(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_named(&self) -> Option<&[Map<String, Value>]> {
        match self {
            Output::Named(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Read result. `all_found` is false if any requested walk does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub data: Output,
    pub all_found: bool,
}
