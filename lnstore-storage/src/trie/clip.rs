//! Clip reduction.
//!
//! Given a trie where some nodes are [`Trie::Wildcard`], `clip` cuts every
//! walk at the first wildcard (or other non-branch node) it meets, leaving
//! an empty branch there. Nodes at `max_depth` are always terminal. The
//! result is the forest of walk prefixes whose whole subtrees are affected,
//! which is what a delete has to invalidate.

use super::Trie;
use lnstore_core::{format_walk, Key, LnError, LnResult, Walk};
use std::collections::BTreeMap;

/// Clip `trie` at its wildcards and at `max_depth`.
///
/// Idempotent: the output contains only branches, so clipping it again
/// changes nothing.
pub fn clip(trie: &Trie, max_depth: usize) -> LnResult<Trie> {
    let mut path = Walk::new();
    clip_node(trie, 0, max_depth, &mut path)
}

fn clip_node(node: &Trie, depth: usize, max_depth: usize, path: &mut Vec<Key>) -> LnResult<Trie> {
    if depth >= max_depth {
        return Ok(Trie::branch());
    }
    match node {
        Trie::Wildcard => Ok(Trie::branch()),
        Trie::Value(v) if v.is_array() || v.is_object() => Err(LnError::malformed(
            depth,
            format_walk(path),
            "container payload above the clip depth",
        )),
        Trie::Value(_) => Ok(Trie::branch()),
        Trie::Branch(children) => {
            let mut out = BTreeMap::new();
            for (key, child) in children {
                path.push(key.clone());
                let clipped = clip_node(child, depth + 1, max_depth, path)?;
                path.pop();
                out.insert(key.clone(), clipped);
            }
            Ok(Trie::Branch(out))
        }
    }
}
