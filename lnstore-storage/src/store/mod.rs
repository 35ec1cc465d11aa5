//! Backing store abstraction.
//!
//! The store is the durable source of truth: one relation per structure
//! descriptor, one column per key level plus a value column, and a
//! composite unique index across the key columns. The paged store only
//! needs filtered selects, atomic mutation batches and table lifecycle.

pub mod lmdb;
pub mod memory;
pub mod row_key;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;

use crate::trie::{unflatten, Record, Trie};
use lnstore_core::{Key, LnResult, StructureDescriptor, Walk};

/// Row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every row.
    All,
    /// Rows whose walk starts with any of these prefixes. A full-length
    /// prefix matches exactly one row.
    Prefixes(Vec<Walk>),
    /// Rows whose key at walk position `position` is one of `keys`,
    /// whatever the other levels hold.
    LevelIn { position: usize, keys: Vec<Key> },
}

impl Filter {
    pub fn matches(&self, walk: &[Key]) -> bool {
        match self {
            Filter::All => true,
            Filter::Prefixes(prefixes) => prefixes.iter().any(|p| walk.starts_with(p)),
            Filter::LevelIn { position, keys } => {
                walk.get(*position).is_some_and(|k| keys.contains(k))
            }
        }
    }

    /// Number of predicates, for log fields.
    pub fn width(&self) -> usize {
        match self {
            Filter::All => 1,
            Filter::Prefixes(prefixes) => prefixes.len(),
            Filter::LevelIn { keys, .. } => keys.len(),
        }
    }
}

/// Projected columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Columns {
    /// Key columns and value.
    All,
    /// Distinct key prefixes of the given length, no value.
    KeysTo(usize),
}

/// Output shape of a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Flat,
    /// Nested map keyed by the selected key columns in level order.
    Nested,
}

/// Result of a select.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Flat(Vec<Record>),
    Nested(Trie),
}

impl Selection {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Selection::Flat(records) => records,
            Selection::Nested(trie) => crate::trie::flatten(&trie, crate::trie::FlattenMode::Data),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selection::Flat(records) => records.is_empty(),
            Selection::Nested(trie) => trie.is_empty_branch(),
        }
    }
}

/// One step of an atomic mutation batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert new rows; an existing walk (or a repeat within the batch)
    /// violates the unique index.
    Insert(Vec<Record>),
    /// Insert or overwrite rows.
    Upsert(Vec<Record>),
    Delete(Filter),
}

/// Row counts affected by a mutation batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSummary {
    pub inserted: u64,
    pub upserted: u64,
    pub deleted: u64,
}

/// Storage trait for paged LN tables.
///
/// Implementations must apply each `apply` batch all-or-nothing and return
/// rows in ascending walk order.
pub trait Store: Send + Sync {
    /// Create the table and its composite unique index.
    fn install(&self, desc: &StructureDescriptor) -> LnResult<()>;

    /// Drop the table.
    fn uninstall(&self, desc: &StructureDescriptor) -> LnResult<()>;

    /// Remove every row, returning how many were removed.
    fn truncate(&self, desc: &StructureDescriptor) -> LnResult<u64>;

    /// Flat select.
    fn select_rows(
        &self,
        desc: &StructureDescriptor,
        filter: &Filter,
        columns: Columns,
    ) -> LnResult<Vec<Record>>;

    /// Apply a mutation batch atomically.
    fn apply(&self, desc: &StructureDescriptor, mutations: &[Mutation])
        -> LnResult<MutationSummary>;

    /// Select in either output shape.
    fn select(
        &self,
        desc: &StructureDescriptor,
        filter: &Filter,
        columns: Columns,
        shape: Shape,
    ) -> LnResult<Selection> {
        let rows = self.select_rows(desc, filter, columns)?;
        match shape {
            Shape::Flat => Ok(Selection::Flat(rows)),
            Shape::Nested => Ok(Selection::Nested(unflatten(&rows)?)),
        }
    }

    fn insert(&self, desc: &StructureDescriptor, rows: Vec<Record>) -> LnResult<u64> {
        Ok(self.apply(desc, &[Mutation::Insert(rows)])?.inserted)
    }

    fn replace(&self, desc: &StructureDescriptor, rows: Vec<Record>) -> LnResult<u64> {
        Ok(self.apply(desc, &[Mutation::Upsert(rows)])?.upserted)
    }

    fn delete(&self, desc: &StructureDescriptor, filter: Filter) -> LnResult<u64> {
        Ok(self.apply(desc, &[Mutation::Delete(filter)])?.deleted)
    }
}

/// Project a full row onto the requested columns.
pub(crate) fn project(walk: &[Key], value: &lnstore_core::Value, columns: Columns) -> Record {
    match columns {
        Columns::All => Record {
            keys: walk.to_vec(),
            value: Some(value.clone()),
        },
        Columns::KeysTo(depth) => Record::keys_only(walk[..depth.min(walk.len())].to_vec()),
    }
}

/// Drop consecutive duplicate key-only records (rows arrive sorted, so
/// equal prefixes are adjacent).
pub(crate) fn dedup_keys(records: &mut Vec<Record>, columns: Columns) {
    if matches!(columns, Columns::KeysTo(_)) {
        records.dedup_by(|a, b| a.keys == b.keys);
    }
}
