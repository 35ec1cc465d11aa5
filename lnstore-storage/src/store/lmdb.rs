//! LMDB-backed store.
//!
//! Uses heed to keep every installed table in one memory-mapped
//! environment. Rows live in the `rows` database under table-scoped,
//! order-preserving keys (see [`row_key`](super::row_key)); values are
//! JSON. The `tables` database records which tables are installed and
//! their key columns.
//!
//! Each [`Store::apply`] batch runs in a single write transaction, which is
//! aborted on the first failing step.

use super::{dedup_keys, project, row_key, Columns, Filter, Mutation, MutationSummary, Store};
use crate::store::memory::full_row;
use crate::trie::Record;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use lnstore_core::{
    format_walk, map_size_bytes, LmdbConfig, LnResult, StoreError, StructureDescriptor, Value,
    Walk,
};
use std::path::Path;

fn txn_err(e: heed::Error) -> StoreError {
    StoreError::TransactionFailed {
        reason: e.to_string(),
    }
}

fn ser_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization {
        reason: e.to_string(),
    }
}

/// LMDB store.
pub struct LmdbStore {
    env: Env,
    rows: Database<Bytes, Bytes>,
    tables: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbStore {
    /// Open (or create) an environment in `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if `map_size_mb` is zero or overflows, and
    /// `TransactionFailed` if the directory cannot be created or the
    /// environment or its databases cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> LnResult<Self> {
        let map_size = map_size_bytes(map_size_mb)?;
        std::fs::create_dir_all(&path).map_err(|e| StoreError::TransactionFailed {
            reason: format!("{}: {}", path.as_ref().display(), e),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(txn_err)?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let rows: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("rows"))
            .map_err(txn_err)?;
        let tables: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("tables"))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, rows, tables })
    }

    pub fn from_config(config: &LmdbConfig) -> LnResult<Self> {
        Self::open(&config.path, config.map_size_mb)
    }

    pub fn is_installed(&self, table: &str) -> LnResult<bool> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self
            .tables
            .get(&rtxn, table.as_bytes())
            .map_err(txn_err)?
            .is_some())
    }

    fn ensure_installed(&self, txn: &RoTxn<'_>, desc: &StructureDescriptor) -> LnResult<()> {
        match self.tables.get(txn, desc.table().as_bytes()).map_err(txn_err)? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotInstalled {
                table: desc.table().to_string(),
            }
            .into()),
        }
    }

    /// Collect `(walk, value)` pairs under an encoded prefix, in key order.
    fn scan(
        &self,
        txn: &RoTxn<'_>,
        desc: &StructureDescriptor,
        prefix: &[u8],
        filter: &Filter,
        out: &mut Vec<(Walk, Vec<u8>)>,
    ) -> LnResult<()> {
        let iter = self.rows.prefix_iter(txn, prefix).map_err(txn_err)?;
        for entry in iter {
            let (key, bytes) = entry.map_err(txn_err)?;
            let walk = row_key::decode(desc.table(), key).ok_or_else(|| {
                StoreError::Serialization {
                    reason: format!("undecodable row key in table {}", desc.table()),
                }
            })?;
            if filter.matches(&walk) {
                out.push((walk, bytes.to_vec()));
            }
        }
        Ok(())
    }

    /// Matching rows in walk order.
    fn matching(
        &self,
        txn: &RoTxn<'_>,
        desc: &StructureDescriptor,
        filter: &Filter,
    ) -> LnResult<Vec<(Walk, Vec<u8>)>> {
        let mut out = Vec::new();
        match filter {
            Filter::Prefixes(prefixes) => {
                for prefix in disjoint(prefixes) {
                    let encoded = row_key::encode(desc.table(), &prefix);
                    self.scan(txn, desc, &encoded, filter, &mut out)?;
                }
            }
            Filter::All | Filter::LevelIn { .. } => {
                let encoded = row_key::table_prefix(desc.table());
                self.scan(txn, desc, &encoded, filter, &mut out)?;
            }
        }
        Ok(out)
    }
}

/// Sort prefixes and drop those covered by a shorter one, so per-prefix
/// scans neither overlap nor come back out of order.
fn disjoint(prefixes: &[Walk]) -> Vec<Walk> {
    let mut sorted = prefixes.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut out: Vec<Walk> = Vec::with_capacity(sorted.len());
    for prefix in sorted {
        if out.last().is_some_and(|kept| prefix.starts_with(kept)) {
            continue;
        }
        out.push(prefix);
    }
    out
}

impl Store for LmdbStore {
    fn install(&self, desc: &StructureDescriptor) -> LnResult<()> {
        let columns = serde_json::to_vec(&desc.columns()).map_err(ser_err)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.tables
            .put(&mut wtxn, desc.table().as_bytes(), &columns)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn uninstall(&self, desc: &StructureDescriptor) -> LnResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let keys = collect_keys(&self.rows, &wtxn, &row_key::table_prefix(desc.table()))?;
        for key in &keys {
            self.rows.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        self.tables
            .delete(&mut wtxn, desc.table().as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn truncate(&self, desc: &StructureDescriptor) -> LnResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.ensure_installed(&wtxn, desc)?;
        let keys = collect_keys(&self.rows, &wtxn, &row_key::table_prefix(desc.table()))?;
        for key in &keys {
            self.rows.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(keys.len() as u64)
    }

    fn select_rows(
        &self,
        desc: &StructureDescriptor,
        filter: &Filter,
        columns: Columns,
    ) -> LnResult<Vec<Record>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.ensure_installed(&rtxn, desc)?;
        let mut out = Vec::new();
        for (walk, bytes) in self.matching(&rtxn, desc, filter)? {
            let value: Value = match columns {
                Columns::All => serde_json::from_slice(&bytes).map_err(ser_err)?,
                Columns::KeysTo(_) => Value::Null,
            };
            out.push(project(&walk, &value, columns));
        }
        dedup_keys(&mut out, columns);
        Ok(out)
    }

    fn apply(
        &self,
        desc: &StructureDescriptor,
        mutations: &[Mutation],
    ) -> LnResult<MutationSummary> {
        // Dropping `wtxn` on an early return aborts the whole batch.
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.ensure_installed(&wtxn, desc)?;

        let mut summary = MutationSummary::default();
        for mutation in mutations {
            match mutation {
                Mutation::Insert(rows) => {
                    for row in rows {
                        let value = full_row(desc, row)?;
                        let key = row_key::encode(desc.table(), &row.keys);
                        if self.rows.get(&wtxn, &key).map_err(txn_err)?.is_some() {
                            return Err(StoreError::UniqueViolation {
                                index: desc.index().name.clone(),
                                walk: format_walk(&row.keys),
                            }
                            .into());
                        }
                        let bytes = serde_json::to_vec(value).map_err(ser_err)?;
                        self.rows.put(&mut wtxn, &key, &bytes).map_err(txn_err)?;
                        summary.inserted += 1;
                    }
                }
                Mutation::Upsert(rows) => {
                    for row in rows {
                        let value = full_row(desc, row)?;
                        let key = row_key::encode(desc.table(), &row.keys);
                        let bytes = serde_json::to_vec(value).map_err(ser_err)?;
                        self.rows.put(&mut wtxn, &key, &bytes).map_err(txn_err)?;
                        summary.upserted += 1;
                    }
                }
                Mutation::Delete(filter) => {
                    let doomed = self.matching(&wtxn, desc, filter)?;
                    for (walk, _) in &doomed {
                        let key = row_key::encode(desc.table(), walk);
                        self.rows.delete(&mut wtxn, &key).map_err(txn_err)?;
                    }
                    summary.deleted += doomed.len() as u64;
                }
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(summary)
    }
}

fn collect_keys(
    db: &Database<Bytes, Bytes>,
    txn: &RoTxn<'_>,
    prefix: &[u8],
) -> LnResult<Vec<Vec<u8>>> {
    let mut keys = Vec::new();
    for entry in db.prefix_iter(txn, prefix).map_err(txn_err)? {
        let (key, _) = entry.map_err(txn_err)?;
        keys.push(key.to_vec());
    }
    Ok(keys)
}
