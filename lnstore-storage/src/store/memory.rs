//! In-memory store for tests and embedding.

use super::{dedup_keys, project, Columns, Filter, Mutation, MutationSummary, Store};
use crate::trie::Record;
use lnstore_core::{format_walk, LnResult, StoreError, StructureDescriptor, Value, Walk};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

type Table = BTreeMap<Walk, Value>;

/// In-memory store. Tables are ordered maps keyed by the full walk, so
/// selects come back in walk order for free.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in `table`, or `None` if it is not installed.
    pub fn row_count(&self, table: &str) -> LnResult<Option<usize>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.get(table).map(BTreeMap::len))
    }

    pub fn is_installed(&self, table: &str) -> LnResult<bool> {
        Ok(self.row_count(table)?.is_some())
    }
}

fn not_installed(desc: &StructureDescriptor) -> StoreError {
    StoreError::NotInstalled {
        table: desc.table().to_string(),
    }
}

/// Check a row is complete before it reaches a table.
pub(crate) fn full_row<'a>(
    desc: &StructureDescriptor,
    record: &'a Record,
) -> Result<&'a Value, StoreError> {
    if record.keys.len() != desc.depth() {
        return Err(StoreError::TransactionFailed {
            reason: format!(
                "row {} has {} keys, table {} has {} levels",
                format_walk(&record.keys),
                record.keys.len(),
                desc.table(),
                desc.depth()
            ),
        });
    }
    record.value.as_ref().ok_or_else(|| StoreError::TransactionFailed {
        reason: format!("row {} has no value", format_walk(&record.keys)),
    })
}

impl Store for MemoryStore {
    fn install(&self, desc: &StructureDescriptor) -> LnResult<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables.entry(desc.table().to_string()).or_default();
        Ok(())
    }

    fn uninstall(&self, desc: &StructureDescriptor) -> LnResult<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables.remove(desc.table());
        Ok(())
    }

    fn truncate(&self, desc: &StructureDescriptor) -> LnResult<u64> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        let table = tables
            .get_mut(desc.table())
            .ok_or_else(|| not_installed(desc))?;
        let removed = table.len() as u64;
        table.clear();
        Ok(removed)
    }

    fn select_rows(
        &self,
        desc: &StructureDescriptor,
        filter: &Filter,
        columns: Columns,
    ) -> LnResult<Vec<Record>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        let table = tables.get(desc.table()).ok_or_else(|| not_installed(desc))?;
        let mut out: Vec<Record> = table
            .iter()
            .filter(|(walk, _)| filter.matches(walk))
            .map(|(walk, value)| project(walk, value, columns))
            .collect();
        dedup_keys(&mut out, columns);
        Ok(out)
    }

    fn apply(
        &self,
        desc: &StructureDescriptor,
        mutations: &[Mutation],
    ) -> LnResult<MutationSummary> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        let current = tables.get(desc.table()).ok_or_else(|| not_installed(desc))?;

        // Work on a copy; swap it in only if every step succeeds.
        let mut staged = current.clone();
        let mut summary = MutationSummary::default();
        for mutation in mutations {
            match mutation {
                Mutation::Insert(rows) => {
                    for row in rows {
                        let value = full_row(desc, row)?;
                        if staged.contains_key(&row.keys) {
                            return Err(StoreError::UniqueViolation {
                                index: desc.index().name.clone(),
                                walk: format_walk(&row.keys),
                            }
                            .into());
                        }
                        staged.insert(row.keys.clone(), value.clone());
                        summary.inserted += 1;
                    }
                }
                Mutation::Upsert(rows) => {
                    for row in rows {
                        let value = full_row(desc, row)?;
                        staged.insert(row.keys.clone(), value.clone());
                        summary.upserted += 1;
                    }
                }
                Mutation::Delete(filter) => {
                    let before = staged.len();
                    staged.retain(|walk, _| !filter.matches(walk));
                    summary.deleted += (before - staged.len()) as u64;
                }
            }
        }
        tables.insert(desc.table().to_string(), staged);
        Ok(summary)
    }
}
