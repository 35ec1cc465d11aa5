//! Authority-tracking read cache.
//!
//! The cache mirrors part of the store as a tree of branch nodes with leaf
//! values at depth N. Alongside the data, every branch records how much of
//! what lies beneath it is known to match the store:
//!
//! - `Complete`: the whole subtree under this node is cached.
//! - `Children(lut)`: the subtrees under the listed child keys are cached,
//!   including children known to be empty (absent from the node).
//! - `Unknown`: only what happens to be cached.
//!
//! A subtree with authority can be answered without touching the store,
//! including "not found" answers. Branches never stay empty: removals prune
//! emptied ancestors (the root excepted) and forget their authority.

use super::CacheStats;
use crate::trie::{flatten_leaves, Trie};
use lnstore_core::{format_walk, Key, LnError, LnResult, Value, Walk};
use std::collections::{BTreeMap, BTreeSet};

/// Authority recorded on a branch node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Authority {
    #[default]
    Unknown,
    Complete,
    Children(BTreeSet<Key>),
}

impl Authority {
    /// Whether the subtree under `key` is fully cached.
    pub fn covers(&self, key: &Key) -> bool {
        match self {
            Authority::Unknown => false,
            Authority::Complete => true,
            Authority::Children(lut) => lut.contains(key),
        }
    }

    fn add_child(&mut self, key: Key) {
        match self {
            Authority::Complete => {}
            Authority::Unknown => *self = Authority::Children(BTreeSet::from([key])),
            Authority::Children(lut) => {
                lut.insert(key);
            }
        }
    }

    fn forget_child(&mut self, key: &Key) {
        if let Authority::Children(lut) = self {
            lut.remove(key);
            if lut.is_empty() {
                *self = Authority::Unknown;
            }
        }
    }
}

/// What a `mark_authoritative` call vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The whole subtree at the walk.
    Subtree,
    /// The subtree under one child of the branch at the walk.
    Child(Key),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Value(Value),
    Branch(CacheNode),
}

impl CacheEntry {
    fn leaf_count(&self) -> usize {
        match self {
            CacheEntry::Value(_) => 1,
            CacheEntry::Branch(node) => node.leaf_count(),
        }
    }

    fn to_trie(&self) -> Trie {
        match self {
            CacheEntry::Value(v) => Trie::Value(v.clone()),
            CacheEntry::Branch(node) => node.to_trie(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheNode {
    children: BTreeMap<Key, CacheEntry>,
    authority: Authority,
}

impl CacheNode {
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn child_keys(&self) -> impl Iterator<Item = &Key> {
        self.children.keys()
    }

    fn leaf_count(&self) -> usize {
        self.children.values().map(CacheEntry::leaf_count).sum()
    }

    fn to_trie(&self) -> Trie {
        Trie::Branch(
            self.children
                .iter()
                .map(|(k, e)| (k.clone(), e.to_trie()))
                .collect(),
        )
    }

    fn node(&self, walk: &[Key]) -> Option<&CacheNode> {
        let mut node = self;
        for key in walk {
            match node.children.get(key)? {
                CacheEntry::Branch(child) => node = child,
                CacheEntry::Value(_) => return None,
            }
        }
        Some(node)
    }

    fn node_mut(&mut self, walk: &[Key]) -> Option<&mut CacheNode> {
        let mut node = self;
        for key in walk {
            match node.children.get_mut(key)? {
                CacheEntry::Branch(child) => node = child,
                CacheEntry::Value(_) => return None,
            }
        }
        Some(node)
    }

    fn tally(&self, stats: &mut CacheStats) {
        match &self.authority {
            Authority::Complete => stats.complete_branches += 1,
            Authority::Children(lut) => stats.lut_entries += lut.len() as u64,
            Authority::Unknown => {}
        }
        for entry in self.children.values() {
            match entry {
                CacheEntry::Value(_) => stats.leaves += 1,
                CacheEntry::Branch(child) => {
                    stats.branches += 1;
                    child.tally(stats);
                }
            }
        }
    }

    fn collect_walks(&self, remaining: usize, path: &mut Walk, out: &mut Vec<Walk>) {
        for (key, entry) in &self.children {
            path.push(key.clone());
            if remaining == 1 {
                out.push(path.clone());
            } else if let CacheEntry::Branch(child) = entry {
                child.collect_walks(remaining - 1, path, out);
            }
            path.pop();
        }
    }
}

/// Remove the entry at `walk` below `node`, pruning branches it empties.
fn drop_in(node: &mut CacheNode, walk: &[Key]) -> usize {
    let Some((first, rest)) = walk.split_first() else {
        return 0;
    };
    let removed = if rest.is_empty() {
        node.children.remove(first).map_or(0, |e| e.leaf_count())
    } else {
        let Some(CacheEntry::Branch(child)) = node.children.get_mut(first) else {
            return 0;
        };
        let removed = drop_in(child, rest);
        if child.children.is_empty() {
            node.children.remove(first);
        } else {
            return removed;
        }
        removed
    };
    node.authority.forget_child(first);
    removed
}

/// Read cache over one store, N levels deep.
#[derive(Debug, Clone)]
pub struct AuthorityCache {
    root: CacheNode,
    depth: usize,
    hits: u64,
    misses: u64,
}

impl AuthorityCache {
    pub fn new(depth: usize) -> Self {
        Self {
            root: CacheNode::default(),
            depth,
            hits: 0,
            misses: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Branch node at `prefix`.
    pub fn node(&self, prefix: &[Key]) -> Option<&CacheNode> {
        self.root.node(prefix)
    }

    /// Cached value of a full walk.
    pub fn get(&self, walk: &[Key]) -> Option<&Value> {
        let (last, parents) = walk.split_last()?;
        match self.root.node(parents)?.children.get(last)? {
            CacheEntry::Value(v) => Some(v),
            CacheEntry::Branch(_) => None,
        }
    }

    /// Whether anything is cached at or under `walk`.
    pub fn contains(&self, walk: &[Key]) -> bool {
        match walk.split_last() {
            None => !self.root.children.is_empty(),
            Some((last, parents)) => self
                .root
                .node(parents)
                .is_some_and(|n| n.children.contains_key(last)),
        }
    }

    /// Cached subtree at `prefix` as a trie (a value for a full walk).
    pub fn subtree(&self, prefix: &[Key]) -> Option<Trie> {
        match prefix.split_last() {
            None => Some(self.root.to_trie()),
            Some((last, parents)) => self
                .root
                .node(parents)?
                .children
                .get(last)
                .map(CacheEntry::to_trie),
        }
    }

    /// Whether the cache alone can answer for everything under `walk`,
    /// absence included.
    pub fn is_authoritative(&self, walk: &[Key]) -> bool {
        let mut node = &self.root;
        for (i, key) in walk.iter().enumerate() {
            if node.authority.covers(key) {
                return true;
            }
            match node.children.get(key) {
                Some(CacheEntry::Branch(child)) => node = child,
                // A cached leaf is its own authority.
                Some(CacheEntry::Value(_)) => return i + 1 == walk.len(),
                None => return false,
            }
        }
        node.authority == Authority::Complete
    }

    /// Cache one leaf. `walk` must be a full walk.
    pub fn put(&mut self, walk: &[Key], value: Value) -> LnResult<()> {
        if walk.len() != self.depth {
            return Err(LnError::malformed(
                walk.len(),
                format_walk(walk),
                format!("cache leaves live at depth {}", self.depth),
            ));
        }
        let Some((last, parents)) = walk.split_last() else {
            return Ok(());
        };
        let mut node = &mut self.root;
        for (i, key) in parents.iter().enumerate() {
            let entry = node
                .children
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::Branch(CacheNode::default()));
            node = match entry {
                CacheEntry::Branch(child) => child,
                CacheEntry::Value(_) => {
                    return Err(LnError::malformed(
                        i + 1,
                        format_walk(&walk[..=i]),
                        "cached value where a branch was expected",
                    ))
                }
            };
        }
        node.children.insert(last.clone(), CacheEntry::Value(value));
        Ok(())
    }

    /// Record authority. Never creates nodes: returns `false` if there is
    /// no branch to record it on.
    ///
    /// `Scope::Subtree` on an existing branch marks it `Complete`; on a
    /// leaf or an absent subtree it becomes a child entry on the parent.
    pub fn mark_authoritative(&mut self, walk: &[Key], scope: Scope) -> bool {
        match scope {
            Scope::Child(key) => match self.root.node_mut(walk) {
                Some(node) => {
                    node.authority.add_child(key);
                    true
                }
                None => false,
            },
            Scope::Subtree => {
                if let Some(node) = self.root.node_mut(walk) {
                    node.authority = Authority::Complete;
                    return true;
                }
                let Some((last, parents)) = walk.split_last() else {
                    return false;
                };
                match self.root.node_mut(parents) {
                    Some(parent) => {
                        parent.authority.add_child(last.clone());
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Remove everything at or under `prefix`. Returns the number of leaves
    /// removed. An empty prefix clears the root but keeps its authority.
    pub fn drop_subtree(&mut self, prefix: &[Key]) -> usize {
        if prefix.is_empty() {
            let removed = self.root.leaf_count();
            self.root.children.clear();
            return removed;
        }
        drop_in(&mut self.root, prefix)
    }

    /// Replace the subtree at `prefix` with `payload`, which must hold
    /// values exactly at depth N. Returns the number of leaves written.
    pub fn replace_subtree(&mut self, prefix: &[Key], payload: &Trie) -> LnResult<usize> {
        let leaves = if payload.is_empty_branch() {
            Vec::new()
        } else {
            flatten_leaves(payload, prefix, self.depth)?
        };
        self.drop_subtree(prefix);
        for (walk, value) in &leaves {
            self.put(walk, value.clone())?;
        }
        Ok(leaves.len())
    }

    /// Cached walks of length `len`, in walk order.
    pub fn walks_at(&self, len: usize) -> Vec<Walk> {
        let mut out = Vec::new();
        if len == 0 {
            out.push(Walk::new());
            return out;
        }
        self.root.collect_walks(len, &mut Walk::new(), &mut out);
        out
    }

    /// Drop all cached data and authority. Hit and miss counters survive.
    pub fn flush(&mut self) {
        self.root = CacheNode::default();
    }

    pub fn record_hits(&mut self, n: u64) {
        self.hits += n;
    }

    pub fn record_misses(&mut self, n: u64) {
        self.misses += n;
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits,
            misses: self.misses,
            ..Default::default()
        };
        self.root.tally(&mut stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnstore_core::walk;

    fn cache() -> AuthorityCache {
        let mut c = AuthorityCache::new(3);
        c.put(&walk![1, "a", 1], Value::from("x")).unwrap();
        c.put(&walk![1, "a", 2], Value::from("y")).unwrap();
        c.put(&walk![1, "b", 1], Value::Null).unwrap();
        c.put(&walk![2, "a", 1], Value::from(0)).unwrap();
        c
    }

    #[test]
    fn test_put_and_get() {
        let c = cache();
        assert_eq!(c.get(&walk![1, "a", 2]), Some(&Value::from("y")));
        assert_eq!(c.get(&walk![1, "b", 1]), Some(&Value::Null));
        assert_eq!(c.get(&walk![1, "a"]), None);
        assert_eq!(c.get(&walk![3, "a", 1]), None);
        assert!(c.contains(&walk![1, "a"]));
        assert!(!c.contains(&walk![1, "c"]));
    }

    #[test]
    fn test_put_rejects_partial_walk() {
        let mut c = AuthorityCache::new(3);
        assert!(c.put(&walk![1, "a"], Value::from(1)).is_err());
        assert!(c.is_empty());
    }

    #[test]
    fn test_unmarked_is_not_authoritative() {
        let c = cache();
        assert!(!c.is_authoritative(&[]));
        assert!(!c.is_authoritative(&walk![1]));
        assert!(!c.is_authoritative(&walk![1, "a"]));
        // Leaves vouch for themselves.
        assert!(c.is_authoritative(&walk![1, "a", 1]));
        assert!(!c.is_authoritative(&walk![1, "a", 9]));
    }

    #[test]
    fn test_complete_covers_descendants() {
        let mut c = cache();
        assert!(c.mark_authoritative(&walk![1], Scope::Subtree));
        assert!(c.is_authoritative(&walk![1]));
        assert!(c.is_authoritative(&walk![1, "zzz"]));
        assert!(c.is_authoritative(&walk![1, "a", 77]));
        assert!(!c.is_authoritative(&walk![2]));
    }

    #[test]
    fn test_child_entry_covers_only_that_child() {
        let mut c = cache();
        assert!(c.mark_authoritative(&walk![1], Scope::Child(Key::from("a"))));
        assert!(c.is_authoritative(&walk![1, "a"]));
        assert!(c.is_authoritative(&walk![1, "a", 5]));
        assert!(!c.is_authoritative(&walk![1, "b"]));
        assert!(!c.is_authoritative(&walk![1]));
    }

    #[test]
    fn test_mark_absent_subtree_uses_parent() {
        let mut c = cache();
        assert!(c.mark_authoritative(&walk![1, "zz"], Scope::Subtree));
        assert!(c.is_authoritative(&walk![1, "zz"]));
        assert_eq!(
            c.node(&walk![1]).unwrap().authority(),
            &Authority::Children(BTreeSet::from([Key::from("zz")]))
        );
        // No branch at [9] to hold the entry.
        assert!(!c.mark_authoritative(&walk![9, "x"], Scope::Subtree));
        // Root always exists.
        assert!(c.mark_authoritative(&walk![9], Scope::Subtree));
        assert!(c.is_authoritative(&walk![9, "x", 1]));
    }

    #[test]
    fn test_drop_prunes_and_forgets() {
        let mut c = cache();
        c.mark_authoritative(&[], Scope::Child(Key::from(2)));
        c.mark_authoritative(&walk![1], Scope::Child(Key::from("b")));

        assert_eq!(c.drop_subtree(&walk![1, "b", 1]), 1);
        // [1,"b"] emptied and pruned; its entry on [1] is gone.
        assert!(!c.contains(&walk![1, "b"]));
        assert_eq!(c.node(&walk![1]).unwrap().authority(), &Authority::Unknown);

        assert_eq!(c.drop_subtree(&walk![2]), 1);
        assert_eq!(c.node(&[]).unwrap().authority(), &Authority::Unknown);

        assert_eq!(c.drop_subtree(&walk![1]), 2);
        assert!(c.is_empty());
        assert_eq!(c.drop_subtree(&walk![1]), 0);
    }

    #[test]
    fn test_drop_keeps_complete() {
        let mut c = cache();
        c.mark_authoritative(&walk![1], Scope::Subtree);
        c.drop_subtree(&walk![1, "a"]);
        assert!(c.is_authoritative(&walk![1, "a"]));
        assert_eq!(c.subtree(&walk![1, "a"]), None);
    }

    #[test]
    fn test_no_empty_branches_after_drop() {
        let mut c = cache();
        c.drop_subtree(&walk![1, "a", 1]);
        c.drop_subtree(&walk![1, "a", 2]);
        c.drop_subtree(&walk![1, "b"]);
        assert!(!c.contains(&walk![1]));
        let stats = c.stats();
        assert_eq!(stats.leaves, 1);
        assert_eq!(stats.branches, 2);
    }

    #[test]
    fn test_replace_subtree() {
        let mut c = cache();
        let payload = Trie::branch()
            .with(7, Trie::value("new"))
            .with(8, Trie::value(false));
        assert_eq!(c.replace_subtree(&walk![1, "a"], &payload).unwrap(), 2);
        assert_eq!(c.subtree(&walk![1, "a"]), Some(payload));

        assert_eq!(c.replace_subtree(&walk![1, "a"], &Trie::branch()).unwrap(), 0);
        assert!(!c.contains(&walk![1, "a"]));

        let bad = Trie::branch().with(7, Trie::branch().with(1, Trie::value(1)));
        assert!(c.replace_subtree(&walk![1, "a"], &bad).is_err());
        // Validation happens before anything is dropped.
        assert!(c.contains(&walk![1, "b"]));
    }

    #[test]
    fn test_walks_at() {
        let c = cache();
        assert_eq!(c.walks_at(1), vec![walk![1], walk![2]]);
        assert_eq!(c.walks_at(2), vec![walk![1, "a"], walk![1, "b"], walk![2, "a"]]);
        assert_eq!(c.walks_at(3).len(), 4);
        assert_eq!(c.walks_at(0), vec![Walk::new()]);
    }

    #[test]
    fn test_stats_and_flush() {
        let mut c = cache();
        c.mark_authoritative(&walk![1], Scope::Subtree);
        c.mark_authoritative(&walk![2], Scope::Child(Key::from("a")));
        c.record_hits(3);
        c.record_misses(1);
        let stats = c.stats();
        assert_eq!(stats.leaves, 4);
        assert_eq!(stats.branches, 5);
        assert_eq!(stats.complete_branches, 1);
        assert_eq!(stats.lut_entries, 1);

        c.flush();
        assert!(c.is_empty());
        assert!(!c.is_authoritative(&walk![1]));
        assert_eq!(c.stats().hits, 3);
    }
}
