//! Paged LN store: the cache-backed datastore.
//!
//! Every operation runs under one mutex guarding the [`AuthorityCache`].
//! Writes hit the store first and then update the cache directly; if the
//! cache update fails after the store accepted the write, the cache is
//! flushed. Reads answer whatever the cache has authority over and issue
//! at most one store query per top-level key for the rest.

use crate::cache::{AuthorityCache, CacheStats, Scope};
use crate::options::{AddInput, Fetched, GetOptions, Output, Query, ResultMode, StoreOptions};
use crate::store::{Columns, Filter, Mutation, Store};
use crate::trie::{
    clip, flatten, flatten_leaves, flatten_named, flatten_request, FlattenMode, Record, Request,
    Trie,
};
use lnstore_core::{
    format_walk, Key, LnError, LnResult, StoreConfig, StoreError, StructureDescriptor,
    ValidationError, Value, Walk,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Part of a read the cache cannot answer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Gap {
    /// Everything under the walk.
    Full(Walk),
    /// Whether anything exists under the walk.
    Exists(Walk),
}

impl Gap {
    fn walk(&self) -> &Walk {
        match self {
            Gap::Full(w) | Gap::Exists(w) => w,
        }
    }
}

fn duplicate(walk: &[Key]) -> LnError {
    ValidationError::DuplicateKey {
        walk: format_walk(walk),
    }
    .into()
}

/// Cache-backed store over N key levels.
pub struct PagedStore<S: Store> {
    store: Arc<S>,
    desc: StructureDescriptor,
    options: StoreOptions,
    cache: Mutex<AuthorityCache>,
}

impl<S: Store> std::fmt::Debug for PagedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedStore")
            .field("table", &self.desc.table())
            .field("depth", &self.desc.depth())
            .field("options", &self.options)
            .finish()
    }
}

impl<S: Store> PagedStore<S> {
    pub fn new(store: Arc<S>, desc: StructureDescriptor) -> Self {
        Self::with_options(store, desc, StoreOptions::default())
    }

    pub fn with_options(store: Arc<S>, desc: StructureDescriptor, options: StoreOptions) -> Self {
        let cache = AuthorityCache::new(desc.depth());
        Self {
            store,
            desc,
            options,
            cache: Mutex::new(cache),
        }
    }

    pub fn from_config(store: Arc<S>, config: &StoreConfig) -> LnResult<Self> {
        let desc = config.descriptor()?;
        Ok(Self::with_options(store, desc, StoreOptions::from(config)))
    }

    pub fn descriptor(&self) -> &StructureDescriptor {
        &self.desc
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of key levels (N).
    pub fn depth(&self) -> usize {
        self.desc.depth()
    }

    fn lock(&self) -> LnResult<MutexGuard<'_, AuthorityCache>> {
        self.cache
            .lock()
            .map_err(|_| LnError::from(StoreError::LockPoisoned))
    }

    /// Flush the cache if a post-write cache update failed.
    fn settle<T>(&self, cache: &mut AuthorityCache, result: LnResult<T>) -> LnResult<T> {
        if let Err(e) = &result {
            tracing::warn!(
                table = self.desc.table(),
                error = %e,
                "Cache update failed after store write, flushing cache"
            );
            cache.flush();
        }
        result
    }

    // === Admin ===

    pub fn install(&self) -> LnResult<()> {
        let mut cache = self.lock()?;
        self.store.install(&self.desc)?;
        cache.flush();
        tracing::info!(
            table = self.desc.table(),
            levels = self.desc.depth(),
            "Installed paged store"
        );
        Ok(())
    }

    pub fn uninstall(&self) -> LnResult<()> {
        let mut cache = self.lock()?;
        self.store.uninstall(&self.desc)?;
        cache.flush();
        tracing::info!(table = self.desc.table(), "Uninstalled paged store");
        Ok(())
    }

    /// Remove every row. Returns the number removed.
    pub fn truncate(&self) -> LnResult<u64> {
        let mut cache = self.lock()?;
        let removed = self.store.truncate(&self.desc)?;
        cache.flush();
        tracing::info!(table = self.desc.table(), removed, "Truncated paged store");
        Ok(removed)
    }

    pub fn flush_cache(&self) -> LnResult<()> {
        self.lock()?.flush();
        Ok(())
    }

    pub fn cache_stats(&self) -> LnResult<CacheStats> {
        Ok(self.lock()?.stats())
    }

    // === Add ===

    /// Add one leaf.
    pub fn add_leaf(&self, walk: Walk, value: impl Into<Value>) -> LnResult<u64> {
        self.add_leaves(vec![(walk, value.into())])
    }

    /// Add every leaf of `subtrie` under `prefix`. With a full-length prefix
    /// `subtrie` is the leaf value itself.
    pub fn add_at(&self, prefix: &[Key], subtrie: &Trie) -> LnResult<u64> {
        if prefix.len() > self.depth() {
            return Err(self.too_deep(prefix));
        }
        if subtrie.is_empty_branch() {
            return Ok(0);
        }
        self.add_leaves(flatten_leaves(subtrie, prefix, self.depth())?)
    }

    /// Add a batch given as a nested trie or as flat records. Either form
    /// of the same data ends in the same state.
    pub fn add_multi(&self, input: AddInput) -> LnResult<u64> {
        let leaves = match input {
            AddInput::Trie(trie) => {
                if trie.is_empty_branch() {
                    return Ok(0);
                }
                flatten_leaves(&trie, &[], self.depth())?
            }
            AddInput::Matrix(records) => records
                .into_iter()
                .map(|r| self.full_leaf(r))
                .collect::<LnResult<Vec<_>>>()?,
        };
        self.add_leaves(leaves)
    }

    fn full_leaf(&self, record: Record) -> LnResult<(Walk, Value)> {
        if record.keys.len() != self.depth() {
            return Err(LnError::malformed(
                record.keys.len(),
                format_walk(&record.keys),
                format!(
                    "record has {} keys, expected {}",
                    record.keys.len(),
                    self.depth()
                ),
            ));
        }
        match record.value {
            Some(value) => Ok((record.keys, value)),
            None => Err(LnError::malformed(
                record.keys.len(),
                format_walk(&record.keys),
                "record has no value",
            )),
        }
    }

    /// Insert new leaves, rejecting the whole batch if any walk exists.
    fn add_leaves(&self, leaves: Vec<(Walk, Value)>) -> LnResult<u64> {
        if leaves.is_empty() {
            return Ok(0);
        }
        let mut seen = BTreeSet::new();
        for (walk, _) in &leaves {
            if walk.len() != self.depth() {
                return Err(self.too_deep(walk));
            }
            if self.options.validate {
                self.desc.validate_walk(walk)?;
            }
            if !seen.insert(walk) {
                return Err(duplicate(walk));
            }
        }

        let mut cache = self.lock()?;
        let mut unknown = Vec::new();
        for (walk, _) in &leaves {
            if cache.is_authoritative(walk) {
                if cache.get(walk).is_some() {
                    return Err(duplicate(walk));
                }
            } else {
                unknown.push(walk.clone());
            }
        }
        if !unknown.is_empty() {
            let probes = unknown.len();
            let existing = self.store.select_rows(
                &self.desc,
                &Filter::Prefixes(unknown),
                Columns::KeysTo(self.depth()),
            )?;
            tracing::debug!(
                table = self.desc.table(),
                probes,
                found = existing.len(),
                "Checked store for existing walks"
            );
            if let Some(row) = existing.first() {
                return Err(duplicate(&row.keys));
            }
        }

        let rows: Vec<Record> = leaves
            .iter()
            .map(|(walk, value)| Record::new(walk.clone(), value.clone()))
            .collect();
        let summary = self
            .store
            .apply(&self.desc, &[Mutation::Insert(rows)])
            .map_err(|e| match e {
                LnError::Store(StoreError::UniqueViolation { walk, .. }) => {
                    ValidationError::DuplicateKey { walk }.into()
                }
                other => other,
            })?;

        let result = leaves.into_iter().try_for_each(|(walk, value)| {
            tracing::trace!(walk = %format_walk(&walk), "Cache put");
            cache.put(&walk, value)
        });
        self.settle(&mut cache, result)?;
        tracing::debug!(
            table = self.desc.table(),
            inserted = summary.inserted,
            "Added leaves"
        );
        Ok(summary.inserted)
    }

    // === Replace ===

    /// Replace whole branches at `clip_level` (1..=N).
    ///
    /// Every walk of `trie` must reach exactly the clip-level key. The node
    /// there is the branch's new content: an empty branch drops it,
    /// otherwise its values must sit exactly at leaf depth (for clip level 1
    /// it is the new leaf value). Validation covers the whole trie before
    /// anything is written. Returns the number of leaves written.
    pub fn replace(&self, clip_level: usize, trie: &Trie) -> LnResult<u64> {
        self.desc.position_of(clip_level)?;
        let prefix_len = self.depth() - clip_level + 1;
        let mut targets = Vec::new();
        collect_targets(trie, prefix_len, &mut Walk::new(), &mut targets)?;
        self.replace_targets(targets)
    }

    /// Replace the single branch at `prefix`.
    pub fn replace_at(&self, prefix: Walk, payload: Trie) -> LnResult<u64> {
        if prefix.is_empty() || prefix.len() > self.depth() {
            return Err(LnError::malformed(
                prefix.len(),
                format_walk(&prefix),
                format!("replace prefixes have 1..={} keys", self.depth()),
            ));
        }
        self.replace_targets(vec![(prefix, payload)])
    }

    fn replace_targets(&self, targets: Vec<(Walk, Trie)>) -> LnResult<u64> {
        if targets.is_empty() {
            return Ok(0);
        }
        let mut rows = Vec::new();
        for (prefix, payload) in &targets {
            if self.options.validate {
                self.desc.validate_walk(prefix)?;
            }
            if payload.is_empty_branch() {
                continue;
            }
            for (walk, value) in flatten_leaves(payload, prefix, self.depth())? {
                if self.options.validate {
                    self.desc.validate_walk(&walk)?;
                }
                rows.push(Record {
                    keys: walk,
                    value: Some(value),
                });
            }
        }

        let mut cache = self.lock()?;
        let was_loaded: Vec<bool> = targets
            .iter()
            .map(|(prefix, _)| cache.is_authoritative(prefix))
            .collect();
        let prefixes: Vec<Walk> = targets.iter().map(|(prefix, _)| prefix.clone()).collect();
        let summary = self.store.apply(
            &self.desc,
            &[
                Mutation::Delete(Filter::Prefixes(prefixes)),
                Mutation::Insert(rows),
            ],
        )?;
        tracing::debug!(
            table = self.desc.table(),
            branches = targets.len(),
            deleted = summary.deleted,
            inserted = summary.inserted,
            "Replaced branches"
        );

        let result = refresh_replaced(&mut cache, &targets, &was_loaded);
        self.settle(&mut cache, result)?;
        Ok(summary.inserted)
    }

    // === Drop ===

    /// Delete every leaf whose key at `level` is one of `keys`, whatever
    /// the other levels hold. Returns the number of leaves removed.
    pub fn drop_global(&self, level: usize, keys: &[Key]) -> LnResult<u64> {
        let position = self.desc.position_of(level)?;
        if keys.is_empty() {
            return Ok(0);
        }
        if self.options.validate {
            for key in keys {
                self.desc.validate_key(position, key)?;
            }
        }

        let mut cache = self.lock()?;
        let summary = self.store.apply(
            &self.desc,
            &[Mutation::Delete(Filter::LevelIn {
                position,
                keys: keys.to_vec(),
            })],
        )?;
        tracing::debug!(
            table = self.desc.table(),
            level,
            keys = keys.len(),
            deleted = summary.deleted,
            "Dropped keys across all branches"
        );
        let result = invalidate_level(&mut cache, position, keys);
        self.settle(&mut cache, result)?;
        Ok(summary.deleted)
    }

    /// Delete the branch (or leaf) at `prefix`. An empty prefix deletes
    /// everything.
    pub fn drop_walk(&self, prefix: &[Key]) -> LnResult<u64> {
        let mut marked = Trie::branch();
        marked.insert(prefix, Trie::Wildcard)?;
        self.drop_multi(&marked)
    }

    /// Delete several branches at once. Any wildcard, value or empty branch
    /// in `trie` stands for itself and everything beneath it; a wildcard
    /// root deletes everything.
    pub fn drop_multi(&self, trie: &Trie) -> LnResult<u64> {
        let everything = matches!(trie, Trie::Wildcard);
        let walks: Vec<Walk> = if everything {
            Vec::new()
        } else {
            if let Some(walk) = deeper_than(trie, self.depth(), &mut Walk::new()) {
                return Err(self.too_deep(&walk));
            }
            flatten(&clip(trie, self.depth())?, FlattenMode::Control)
                .into_iter()
                .map(|r| r.keys)
                .collect()
        };
        if !everything && walks.is_empty() {
            return Ok(0);
        }
        if self.options.validate {
            for walk in &walks {
                self.desc.validate_walk(walk)?;
            }
        }

        let mut cache = self.lock()?;
        let filter = if everything {
            Filter::All
        } else {
            Filter::Prefixes(walks.clone())
        };
        let summary = self.store.apply(&self.desc, &[Mutation::Delete(filter)])?;
        tracing::debug!(
            table = self.desc.table(),
            branches = walks.len(),
            deleted = summary.deleted,
            "Dropped branches"
        );
        if everything {
            cache.drop_subtree(&[]);
            cache.mark_authoritative(&[], Scope::Subtree);
        } else {
            for walk in &walks {
                let removed = cache.drop_subtree(walk);
                tracing::trace!(walk = %format_walk(walk), removed, "Cache drop");
            }
        }
        Ok(summary.deleted)
    }

    // === Get ===

    /// Read a request, answering from the cache where it has authority and
    /// fetching the rest with one store query per top-level key.
    pub fn get_multi(&self, query: Query, opts: &GetOptions) -> LnResult<Fetched> {
        let validate = opts.validate.unwrap_or(self.options.validate);
        let request = match query {
            Query::Trie(request) => request,
            Query::Matrix(walks) => {
                if let Some(walk) = walks.iter().find(|w| w.len() > self.depth()) {
                    return Err(self.too_deep(walk));
                }
                Request::from_walks(&walks)
            }
        };
        self.check_request(&request, &mut Walk::new(), validate)?;

        if matches!(&request, Request::Keys(children) if children.is_empty()) {
            return Ok(Fetched {
                data: shape(Trie::branch(), &self.desc, opts.result),
                all_found: true,
            });
        }

        let mut cache = self.lock()?;
        let mut gaps = Vec::new();
        plan(&cache, &request, &mut Walk::new(), &mut gaps);

        let ends = flatten_request(&request).len() as u64;
        cache.record_misses(gaps.len() as u64);
        cache.record_hits(ends.saturating_sub(gaps.len() as u64));

        // One store query per top-level key; a root gap is its own group.
        let mut groups: BTreeMap<Walk, Vec<Gap>> = BTreeMap::new();
        for gap in gaps {
            let top = gap.walk().iter().take(1).cloned().collect();
            groups.entry(top).or_default().push(gap);
        }
        let mut existing = BTreeSet::new();
        for gaps in groups.values() {
            self.fetch_gaps(&mut cache, gaps, &mut existing)?;
        }

        let mut all_found = true;
        let trie = assemble(&cache, &request, &mut Walk::new(), &existing, &mut all_found)
            .unwrap_or_default();
        Ok(Fetched {
            data: shape(trie, &self.desc, opts.result),
            all_found,
        })
    }

    fn fetch_gaps(
        &self,
        cache: &mut AuthorityCache,
        gaps: &[Gap],
        existing: &mut BTreeSet<Walk>,
    ) -> LnResult<()> {
        let walks: Vec<Walk> = gaps.iter().map(|g| g.walk().clone()).collect();
        let filter = if walks.iter().any(Vec::is_empty) {
            Filter::All
        } else {
            Filter::Prefixes(walks.clone())
        };

        if gaps.iter().all(|g| matches!(g, Gap::Exists(_))) {
            let depth = walks.iter().map(Vec::len).max().unwrap_or(0);
            let rows = self
                .store
                .select_rows(&self.desc, &filter, Columns::KeysTo(depth))?;
            tracing::debug!(
                table = self.desc.table(),
                gaps = gaps.len(),
                rows = rows.len(),
                "Fetched existence of uncached walks"
            );
            for walk in walks {
                if rows.iter().any(|r| r.keys.starts_with(&walk)) {
                    existing.insert(walk);
                }
            }
            return Ok(());
        }

        let rows = self.store.select_rows(&self.desc, &filter, Columns::All)?;
        tracing::debug!(
            table = self.desc.table(),
            gaps = gaps.len(),
            width = filter.width(),
            rows = rows.len(),
            "Fetched uncached walks"
        );
        let result = merge_rows(cache, rows);
        self.settle(cache, result)?;
        for walk in &walks {
            if cache.mark_authoritative(walk, Scope::Subtree) {
                tracing::debug!(
                    table = self.desc.table(),
                    walk = %format_walk(walk),
                    "Marked walk authoritative"
                );
            }
        }
        Ok(())
    }

    fn check_request(&self, request: &Request, path: &mut Walk, validate: bool) -> LnResult<()> {
        match request {
            Request::All => Ok(()),
            Request::Keys(_) if path.len() >= self.depth() => Err(LnError::malformed(
                path.len(),
                format_walk(path),
                "a leaf request must ask for the whole leaf",
            )),
            Request::Keys(children) => {
                for (key, child) in children {
                    if validate {
                        self.desc.validate_key(path.len(), key)?;
                    }
                    path.push(key.clone());
                    self.check_request(child, path, validate)?;
                    path.pop();
                }
                Ok(())
            }
        }
    }

    /// Value of one leaf.
    pub fn get_leaf(&self, walk: &[Key]) -> LnResult<Option<Value>> {
        if walk.len() != self.depth() {
            return Err(LnError::malformed(
                walk.len(),
                format_walk(walk),
                format!("leaf walks have {} keys", self.depth()),
            ));
        }
        let fetched = self.get_multi(Query::Matrix(vec![walk.to_vec()]), &GetOptions::default())?;
        Ok(fetched
            .data
            .as_trie()
            .and_then(|t| t.get(walk))
            .and_then(Trie::as_value)
            .cloned())
    }

    /// Everything under `prefix`, or `None` if nothing is stored there.
    pub fn get_branch(&self, prefix: &[Key]) -> LnResult<Option<Trie>> {
        let fetched = self.get_walk(prefix, &GetOptions::default())?;
        if !fetched.all_found {
            return Ok(None);
        }
        Ok(fetched.data.as_trie().and_then(|t| t.get(prefix)).cloned())
    }

    /// The listed children of `prefix`, each with everything beneath it.
    /// No keys is an existence check on `prefix`.
    pub fn get_children(&self, prefix: &[Key], keys: &[Key], opts: &GetOptions) -> LnResult<Fetched> {
        let mut request = keys
            .iter()
            .fold(Request::keys(), |r, k| r.with(k.clone(), Request::All));
        for key in prefix.iter().rev() {
            request = Request::keys().with(key.clone(), request);
        }
        self.get_multi(Query::Trie(request), opts)
    }

    /// Everything under `prefix`.
    pub fn get_walk(&self, prefix: &[Key], opts: &GetOptions) -> LnResult<Fetched> {
        self.get_multi(Query::Matrix(vec![prefix.to_vec()]), opts)
    }

    fn too_deep(&self, walk: &[Key]) -> LnError {
        LnError::malformed(
            walk.len(),
            format_walk(walk),
            format!("walk has {} keys, store has {} levels", walk.len(), self.depth()),
        )
    }
}

fn shape(trie: Trie, desc: &StructureDescriptor, mode: ResultMode) -> Output {
    match mode {
        ResultMode::Trie => Output::Trie(trie),
        ResultMode::Matrix => Output::Matrix(flatten(&trie, FlattenMode::Data)),
        ResultMode::Named => Output::Named(flatten_named(&trie, desc, FlattenMode::Data)),
    }
}

/// Split a replace trie into `(prefix, payload)` pairs at `prefix_len`.
fn collect_targets(
    node: &Trie,
    prefix_len: usize,
    path: &mut Walk,
    out: &mut Vec<(Walk, Trie)>,
) -> LnResult<()> {
    if path.len() == prefix_len {
        out.push((path.clone(), node.clone()));
        return Ok(());
    }
    match node {
        Trie::Branch(children) if !children.is_empty() => {
            for (key, child) in children {
                path.push(key.clone());
                collect_targets(child, prefix_len, path, out)?;
                path.pop();
            }
            Ok(())
        }
        Trie::Branch(_) if path.is_empty() => Ok(()),
        _ => Err(LnError::malformed(
            path.len(),
            format_walk(path),
            format!(
                "walk ends at depth {} above the clip level (depth {})",
                path.len(),
                prefix_len
            ),
        )),
    }
}

/// First walk where `node` has keys below depth `max`.
fn deeper_than(node: &Trie, max: usize, path: &mut Walk) -> Option<Walk> {
    let Trie::Branch(children) = node else {
        return None;
    };
    if path.len() >= max && !children.is_empty() {
        return Some(path.clone());
    }
    for (key, child) in children {
        path.push(key.clone());
        if let Some(walk) = deeper_than(child, max, path) {
            return Some(walk);
        }
        path.pop();
    }
    None
}

/// Write replaced branches into the cache and give each a fresh authority
/// marker: `Complete` if the branch was fully loaded before, otherwise a
/// child entry on its parent.
fn refresh_replaced(
    cache: &mut AuthorityCache,
    targets: &[(Walk, Trie)],
    was_loaded: &[bool],
) -> LnResult<()> {
    for ((prefix, payload), loaded) in targets.iter().zip(was_loaded) {
        cache.replace_subtree(prefix, payload)?;
        if *loaded {
            cache.mark_authoritative(prefix, Scope::Subtree);
        } else if let Some((last, parent)) = prefix.split_last() {
            cache.mark_authoritative(parent, Scope::Child(last.clone()));
        }
    }
    Ok(())
}

/// Drop cached subtrees whose key at `position` is one of `keys`.
fn invalidate_level(cache: &mut AuthorityCache, position: usize, keys: &[Key]) -> LnResult<()> {
    let mut marked = Trie::branch();
    for walk in cache.walks_at(position + 1) {
        if walk.last().is_some_and(|k| keys.contains(k)) {
            marked.insert(&walk, Trie::Wildcard)?;
        }
    }
    for record in flatten(&clip(&marked, cache.depth())?, FlattenMode::Control) {
        let removed = cache.drop_subtree(&record.keys);
        tracing::trace!(walk = %format_walk(&record.keys), removed, "Cache drop");
    }
    Ok(())
}

fn merge_rows(cache: &mut AuthorityCache, rows: Vec<Record>) -> LnResult<()> {
    for row in rows {
        let value = row.value.ok_or_else(|| StoreError::Serialization {
            reason: format!("row {} came back without a value", format_walk(&row.keys)),
        })?;
        cache.put(&row.keys, value)?;
    }
    Ok(())
}

/// Collect the parts of `request` the cache cannot answer.
fn plan(cache: &AuthorityCache, request: &Request, path: &mut Walk, gaps: &mut Vec<Gap>) {
    if cache.is_authoritative(path) {
        return;
    }
    match request {
        Request::All => gaps.push(Gap::Full(path.clone())),
        Request::Keys(children) if children.is_empty() => {
            // Cached data under a walk proves it exists.
            if !cache.contains(path) {
                gaps.push(Gap::Exists(path.clone()));
            }
        }
        Request::Keys(children) => {
            for (key, child) in children {
                path.push(key.clone());
                plan(cache, child, path, gaps);
                path.pop();
            }
        }
    }
}

/// Build the answer from the cache. Missing walks are omitted and clear
/// `all_found`; an existence check that succeeds yields an empty branch.
fn assemble(
    cache: &AuthorityCache,
    request: &Request,
    path: &mut Walk,
    existing: &BTreeSet<Walk>,
    all_found: &mut bool,
) -> Option<Trie> {
    match request {
        Request::All => match cache.subtree(path) {
            Some(trie) if !trie.is_empty_branch() => Some(trie),
            _ => {
                *all_found = false;
                None
            }
        },
        Request::Keys(children) if children.is_empty() => {
            if cache.contains(path) || existing.contains(path.as_slice()) {
                Some(Trie::branch())
            } else {
                *all_found = false;
                None
            }
        }
        Request::Keys(children) => {
            let mut out = BTreeMap::new();
            for (key, child) in children {
                path.push(key.clone());
                if let Some(trie) = assemble(cache, child, path, existing, all_found) {
                    out.insert(key.clone(), trie);
                }
                path.pop();
            }
            if out.is_empty() {
                None
            } else {
                Some(Trie::Branch(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use lnstore_core::{walk, LevelDescriptor, ValueDescriptor};

    fn desc() -> StructureDescriptor {
        StructureDescriptor::new(
            "paged_unit",
            vec![
                LevelDescriptor::int("doc"),
                LevelDescriptor::str("section"),
                LevelDescriptor::int("line"),
            ],
            ValueDescriptor::default(),
        )
        .unwrap()
    }

    fn paged() -> PagedStore<MemoryStore> {
        let p = PagedStore::new(Arc::new(MemoryStore::new()), desc());
        p.install().unwrap();
        p
    }

    /// Store whose full selects lose the value of the last row.
    struct ValuelessTail(MemoryStore);

    impl Store for ValuelessTail {
        fn install(&self, desc: &StructureDescriptor) -> LnResult<()> {
            self.0.install(desc)
        }

        fn uninstall(&self, desc: &StructureDescriptor) -> LnResult<()> {
            self.0.uninstall(desc)
        }

        fn truncate(&self, desc: &StructureDescriptor) -> LnResult<u64> {
            self.0.truncate(desc)
        }

        fn select_rows(
            &self,
            desc: &StructureDescriptor,
            filter: &Filter,
            columns: Columns,
        ) -> LnResult<Vec<Record>> {
            let mut rows = self.0.select_rows(desc, filter, columns)?;
            if columns == Columns::All {
                if let Some(last) = rows.last_mut() {
                    last.value = None;
                }
            }
            Ok(rows)
        }

        fn apply(
            &self,
            desc: &StructureDescriptor,
            mutations: &[Mutation],
        ) -> LnResult<crate::store::MutationSummary> {
            self.0.apply(desc, mutations)
        }
    }

    #[test]
    fn test_add_and_get_leaf() {
        let p = paged();
        assert_eq!(p.add_leaf(walk![1, "a", 1], "x").unwrap(), 1);
        assert_eq!(p.get_leaf(&walk![1, "a", 1]).unwrap(), Some(Value::from("x")));
        assert_eq!(p.get_leaf(&walk![1, "a", 2]).unwrap(), None);
    }

    #[test]
    fn test_falsy_values_are_found() {
        let p = paged();
        p.add_leaf(walk![1, "a", 1], Value::Null).unwrap();
        p.add_leaf(walk![1, "a", 2], false).unwrap();
        p.add_leaf(walk![1, "a", 3], 0).unwrap();
        p.flush_cache().unwrap();
        let fetched = p
            .get_children(&walk![1, "a"], &walk![1, 2, 3], &GetOptions::default())
            .unwrap();
        assert!(fetched.all_found);
        assert_eq!(fetched.data.as_trie().unwrap().leaf_count(), 3);
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let p = paged();
        p.add_leaf(walk![1, "a", 1], 1).unwrap();
        let err = p.add_leaf(walk![1, "a", 1], 2).unwrap_err();
        assert!(err.is_duplicate_key());
        p.flush_cache().unwrap();
        let err = p.add_leaf(walk![1, "a", 1], 2).unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(p.get_leaf(&walk![1, "a", 1]).unwrap(), Some(Value::from(1)));
    }

    #[test]
    fn test_add_type_mismatch() {
        let p = paged();
        let err = p.add_leaf(walk!["one", "a", 1], 1).unwrap_err();
        assert!(matches!(
            err,
            LnError::Validation(ValidationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_add_wrong_depth() {
        let p = paged();
        assert!(p.add_leaf(walk![1, "a"], 1).unwrap_err().is_malformed_trie());
        let bad = AddInput::Matrix(vec![Record::keys_only(walk![1, "a", 1])]);
        assert!(p.add_multi(bad).unwrap_err().is_malformed_trie());
    }

    #[test]
    fn test_add_at_prefix() {
        let p = paged();
        let payload = Trie::branch()
            .with("a", Trie::branch().with(1, Trie::value(1)))
            .with("b", Trie::branch().with(1, Trie::value(2)));
        assert_eq!(p.add_at(&walk![4], &payload).unwrap(), 2);
        assert_eq!(p.get_leaf(&walk![4, "b", 1]).unwrap(), Some(Value::from(2)));
        assert_eq!(p.add_at(&walk![4, "c", 1], &Trie::value(3)).unwrap(), 1);
    }

    #[test]
    fn test_existence_request() {
        let p = paged();
        p.add_leaf(walk![1, "a", 1], 1).unwrap();
        p.flush_cache().unwrap();
        let request = Request::keys()
            .with(1, Request::keys().with("a", Request::keys()))
            .with(2, Request::keys());
        let fetched = p.get_multi(Query::Trie(request), &GetOptions::default()).unwrap();
        assert!(!fetched.all_found);
        assert_eq!(
            fetched.data,
            Output::Trie(Trie::branch().with(1, Trie::branch().with("a", Trie::branch())))
        );
        // Existence checks do not populate the cache.
        assert_eq!(p.cache_stats().unwrap().leaves, 0);
    }

    #[test]
    fn test_leaf_request_must_be_all() {
        let p = paged();
        let request = Request::keys().with(
            1,
            Request::keys().with("a", Request::keys().with(1, Request::keys())),
        );
        let err = p
            .get_multi(Query::Trie(request), &GetOptions::default())
            .unwrap_err();
        assert!(err.is_malformed_trie());
    }

    #[test]
    fn test_empty_request() {
        let p = paged();
        let fetched = p
            .get_multi(Query::Trie(Request::keys()), &GetOptions::matrix())
            .unwrap();
        assert!(fetched.all_found);
        assert_eq!(fetched.data, Output::Matrix(vec![]));
    }

    #[test]
    fn test_get_whole_store() {
        let p = paged();
        p.add_leaf(walk![1, "a", 1], 1).unwrap();
        p.add_leaf(walk![2, "b", 1], 2).unwrap();
        p.flush_cache().unwrap();
        let fetched = p.get_walk(&[], &GetOptions::matrix()).unwrap();
        assert!(fetched.all_found);
        assert_eq!(fetched.data.as_matrix().unwrap().len(), 2);
        assert_eq!(p.cache_stats().unwrap().complete_branches, 1);

        p.truncate().unwrap();
        let fetched = p.get_walk(&[], &GetOptions::default()).unwrap();
        assert!(!fetched.all_found);
        assert_eq!(fetched.data, Output::Trie(Trie::branch()));
    }

    #[test]
    fn test_drop_walk_prunes() {
        let p = paged();
        p.add_leaf(walk![1, "a", 1], 1).unwrap();
        p.add_leaf(walk![1, "b", 1], 2).unwrap();
        assert_eq!(p.drop_walk(&walk![1, "a", 1]).unwrap(), 1);
        assert_eq!(p.get_branch(&walk![1, "a"]).unwrap(), None);
        assert!(p.get_branch(&walk![1]).unwrap().is_some());
        assert_eq!(p.drop_walk(&walk![1]).unwrap(), 1);
        assert_eq!(p.get_branch(&walk![1]).unwrap(), None);
    }

    #[test]
    fn test_drop_multi_rejects_deep_trie() {
        let p = paged();
        let deep = Trie::branch().with(
            1,
            Trie::branch().with("a", Trie::branch().with(1, Trie::branch().with(0, Trie::Wildcard))),
        );
        assert!(p.drop_multi(&deep).unwrap_err().is_malformed_trie());
    }

    #[test]
    fn test_drop_everything_marks_root() {
        let p = paged();
        p.add_leaf(walk![1, "a", 1], 1).unwrap();
        assert_eq!(p.drop_multi(&Trie::Wildcard).unwrap(), 1);
        assert_eq!(p.cache_stats().unwrap().complete_branches, 1);
        assert_eq!(p.get_leaf(&walk![1, "a", 1]).unwrap(), None);
    }

    #[test]
    fn test_replace_rejects_shallow_walk() {
        let p = paged();
        let shallow = Trie::branch().with(1, Trie::branch());
        let err = p.replace(2, &shallow).unwrap_err();
        assert!(err.is_malformed_trie());
        assert!(p.replace(4, &Trie::branch()).is_err());
        assert!(p.replace(0, &Trie::branch()).is_err());
    }

    #[test]
    fn test_failed_cache_fill_flushes_cache() {
        let p = PagedStore::new(Arc::new(ValuelessTail(MemoryStore::new())), desc());
        p.install().unwrap();
        p.add_leaf(walk![1, "a", 1], 1).unwrap();
        p.add_leaf(walk![1, "a", 2], 2).unwrap();
        p.add_leaf(walk![2, "a", 1], 3).unwrap();
        assert_eq!(p.cache_stats().unwrap().leaves, 3);

        // The first row lands in the cache before the second one fails.
        let err = p.get_walk(&walk![1], &GetOptions::default()).unwrap_err();
        assert!(matches!(err, LnError::Store(StoreError::Serialization { .. })));
        let stats = p.cache_stats().unwrap();
        assert_eq!(stats.leaves, 0);
        assert_eq!(stats.complete_branches, 0);
    }

    #[test]
    fn test_failed_cache_write_flushes_cache() {
        let p = paged();
        p.add_leaf(walk![1, "a", 1], 1).unwrap();
        // A cache of the wrong depth rejects every put after the store write.
        *p.lock().unwrap() = AuthorityCache::new(2);
        p.lock().unwrap().put(&walk![9, "z"], Value::from(0)).unwrap();

        let err = p.add_leaf(walk![1, "a", 2], 2).unwrap_err();
        assert!(err.is_malformed_trie());
        assert_eq!(p.cache_stats().unwrap().leaves, 0);

        *p.lock().unwrap() = AuthorityCache::new(3);
        assert_eq!(p.get_leaf(&walk![1, "a", 2]).unwrap(), Some(Value::from(2)));
        assert_eq!(p.get_leaf(&walk![1, "a", 1]).unwrap(), Some(Value::from(1)));
    }

    #[test]
    fn test_lock_poisoning_surfaces() {
        let p = Arc::new(paged());
        let inner = Arc::clone(&p);
        let _ = std::thread::spawn(move || {
            let _guard = inner.cache.lock().unwrap();
            panic!("poison");
        })
        .join();
        let err = p.flush_cache().unwrap_err();
        assert_eq!(err, LnError::Store(StoreError::LockPoisoned));
    }
}
