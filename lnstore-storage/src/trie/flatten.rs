//! Trie <-> record conversion.
//!
//! `flatten` walks a trie depth-first, first child first, accumulating the
//! keys on the way down and emitting one record per end node. End nodes are
//! values, wildcards and empty branches. `unflatten` is the inverse.

use super::{Record, Request, Trie};
use lnstore_core::{format_walk, Key, LnError, LnResult, StructureDescriptor, Value, Walk};
use serde_json::Map;

/// Which payload flattened records carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenMode {
    /// Records carry the value of value end nodes.
    Data,
    /// Key-only records, for building existence predicates.
    Control,
}

/// Flatten a whole trie.
pub fn flatten(trie: &Trie, mode: FlattenMode) -> Vec<Record> {
    flatten_at(trie, &[], mode)
}

/// Flatten a whole trie into records keyed by the descriptor's column names.
pub fn flatten_named(
    trie: &Trie,
    desc: &StructureDescriptor,
    mode: FlattenMode,
) -> Vec<Map<String, Value>> {
    flatten(trie, mode)
        .iter()
        .map(|r| desc.row_to_json(&r.keys, r.value.as_ref()))
        .collect()
}

/// Flatten a subtrie that lives under `prefix`.
pub fn flatten_at(trie: &Trie, prefix: &[Key], mode: FlattenMode) -> Vec<Record> {
    let mut out = Vec::new();
    let mut path = prefix.to_vec();
    // An empty root or a wildcard root is a synthetic container, not an end node.
    match trie {
        Trie::Branch(children) if children.is_empty() => {}
        Trie::Wildcard if prefix.is_empty() => {}
        _ => descend(trie, &mut path, mode, &mut out),
    }
    out
}

fn descend(node: &Trie, path: &mut Walk, mode: FlattenMode, out: &mut Vec<Record>) {
    match node {
        Trie::Branch(children) if !children.is_empty() => {
            for (key, child) in children {
                path.push(key.clone());
                descend(child, path, mode, out);
                path.pop();
            }
        }
        Trie::Value(v) if mode == FlattenMode::Data => out.push(Record {
            keys: path.clone(),
            value: Some(v.clone()),
        }),
        _ => out.push(Record::keys_only(path.clone())),
    }
}

/// Rebuild the nested form of a record list.
///
/// Key-only records become empty branches (unless something already lives
/// there). Records whose walk passes through another record's value fail
/// with `MalformedTrie`.
pub fn unflatten<'a, I>(records: I) -> LnResult<Trie>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut root = Trie::branch();
    for record in records {
        match &record.value {
            Some(v) => {
                if matches!(root.get(&record.keys), Some(Trie::Branch(c)) if !c.is_empty()) {
                    return Err(LnError::malformed(
                        record.keys.len(),
                        format_walk(&record.keys),
                        "value collides with a branch",
                    ));
                }
                root.insert(&record.keys, Trie::Value(v.clone()))?;
            }
            None => match root.get(&record.keys) {
                Some(Trie::Branch(_)) => {}
                Some(_) => {
                    return Err(LnError::malformed(
                        record.keys.len(),
                        format_walk(&record.keys),
                        "key-only record collides with a value",
                    ))
                }
                None => root.insert(&record.keys, Trie::branch())?,
            },
        }
    }
    Ok(root)
}

/// Flatten a subtrie that must hold values exactly at `depth`.
///
/// Used to validate write payloads: every end node must be a value sitting
/// at total depth `depth` (prefix included). Empty branches, wildcards,
/// values above `depth` and branches at `depth` are rejected.
pub fn flatten_leaves(trie: &Trie, prefix: &[Key], depth: usize) -> LnResult<Vec<(Walk, Value)>> {
    let mut out = Vec::new();
    let mut path = prefix.to_vec();
    collect_leaves(trie, &mut path, depth, &mut out)?;
    Ok(out)
}

fn collect_leaves(
    node: &Trie,
    path: &mut Walk,
    depth: usize,
    out: &mut Vec<(Walk, Value)>,
) -> LnResult<()> {
    let here = path.len();
    match node {
        Trie::Value(v) if here == depth => {
            out.push((path.clone(), v.clone()));
            Ok(())
        }
        Trie::Value(_) => Err(LnError::malformed(
            here,
            format_walk(path),
            format!("value ends the walk at depth {}, expected {}", here, depth),
        )),
        Trie::Wildcard => Err(LnError::malformed(
            here,
            format_walk(path),
            "wildcard in a write payload",
        )),
        Trie::Branch(_) if here >= depth => Err(LnError::malformed(
            here,
            format_walk(path),
            "container where a value was expected",
        )),
        Trie::Branch(children) if children.is_empty() => Err(LnError::malformed(
            here,
            format_walk(path),
            format!("empty branch ends the walk at depth {}, expected {}", here, depth),
        )),
        Trie::Branch(children) => {
            for (key, child) in children {
                path.push(key.clone());
                collect_leaves(child, path, depth, out)?;
                path.pop();
            }
            Ok(())
        }
    }
}

/// Matrix form of a request: one walk per `All` end, plus one per empty
/// `Keys` (existence check).
pub fn flatten_request(request: &Request) -> Vec<Walk> {
    fn go(req: &Request, path: &mut Walk, out: &mut Vec<Walk>) {
        match req {
            Request::All => out.push(path.clone()),
            Request::Keys(children) if children.is_empty() => out.push(path.clone()),
            Request::Keys(children) => {
                for (key, child) in children {
                    path.push(key.clone());
                    go(child, path, out);
                    path.pop();
                }
            }
        }
    }
    let mut out = Vec::new();
    if let Request::Keys(children) = request {
        if children.is_empty() {
            return out;
        }
    }
    go(request, &mut Vec::new(), &mut out);
    out
}
