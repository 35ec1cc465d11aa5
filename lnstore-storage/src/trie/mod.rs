//! Key tries.
//!
//! A `Trie` is the nested form of a set of walks: every branch maps one
//! level's key values to child nodes, and values sit at the ends. The same
//! type carries write payloads, read results and the wildcard-marked tries
//! fed to [`clip`]. A `Request` is the sparse shape submitted to a read.
//!
//! Children are kept in ascending key order, so depth-first traversal is
//! deterministic: two tries holding the same data flatten to the same
//! records in the same order.

mod clip;
mod flatten;

pub use clip::clip;
pub use flatten::{
    flatten, flatten_at, flatten_leaves, flatten_named, flatten_request, unflatten, FlattenMode,
};

use lnstore_core::{format_walk, Key, LnError, LnResult, Value, Walk};
use std::collections::BTreeMap;

/// One node of a key trie.
#[derive(Debug, Clone, PartialEq)]
pub enum Trie {
    /// End node carrying a `Level0` payload.
    Value(Value),
    /// Mapping from one level's keys to child nodes.
    Branch(BTreeMap<Key, Trie>),
    /// "Anything here": the branch is not spelled out at this node.
    Wildcard,
}

impl Default for Trie {
    fn default() -> Self {
        Trie::branch()
    }
}

impl Trie {
    /// Empty branch.
    pub fn branch() -> Self {
        Trie::Branch(BTreeMap::new())
    }

    pub fn value(v: impl Into<Value>) -> Self {
        Trie::Value(v.into())
    }

    /// Builder: add `child` under `key`. Non-branch receivers become branches.
    pub fn with(mut self, key: impl Into<Key>, child: Trie) -> Self {
        if !matches!(self, Trie::Branch(_)) {
            self = Trie::branch();
        }
        if let Trie::Branch(children) = &mut self {
            children.insert(key.into(), child);
        }
        self
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Trie::Branch(_))
    }

    pub fn is_empty_branch(&self) -> bool {
        matches!(self, Trie::Branch(children) if children.is_empty())
    }

    pub fn as_branch(&self) -> Option<&BTreeMap<Key, Trie>> {
        match self {
            Trie::Branch(children) => Some(children),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Trie::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Node at `walk`, if every step is a branch containing the next key.
    pub fn get(&self, walk: &[Key]) -> Option<&Trie> {
        let mut node = self;
        for key in walk {
            node = node.as_branch()?.get(key)?;
        }
        Some(node)
    }

    /// Place `node` at `walk`, creating intermediate branches.
    ///
    /// Fails if the walk passes through a value or wildcard.
    pub fn insert(&mut self, walk: &[Key], node: Trie) -> LnResult<()> {
        let Some((last, parents)) = walk.split_last() else {
            *self = node;
            return Ok(());
        };
        let mut current = self;
        for (depth, key) in parents.iter().enumerate() {
            let Trie::Branch(children) = current else {
                return Err(LnError::malformed(
                    depth,
                    format_walk(&walk[..depth]),
                    "walk passes through an end node",
                ));
            };
            current = children.entry(key.clone()).or_insert_with(Trie::branch);
        }
        match current {
            Trie::Branch(children) => {
                children.insert(last.clone(), node);
                Ok(())
            }
            _ => Err(LnError::malformed(
                parents.len(),
                format_walk(parents),
                "walk passes through an end node",
            )),
        }
    }

    /// Number of value nodes.
    pub fn leaf_count(&self) -> usize {
        match self {
            Trie::Value(_) => 1,
            Trie::Wildcard => 0,
            Trie::Branch(children) => children.values().map(Trie::leaf_count).sum(),
        }
    }

    pub fn contains_wildcard(&self) -> bool {
        match self {
            Trie::Wildcard => true,
            Trie::Value(_) => false,
            Trie::Branch(children) => children.values().any(Trie::contains_wildcard),
        }
    }

    /// JSON rendering: branches become objects keyed by the key's text,
    /// the wildcard becomes `"*"`.
    pub fn to_json(&self) -> Value {
        match self {
            Trie::Value(v) => v.clone(),
            Trie::Wildcard => Value::from("*"),
            Trie::Branch(children) => {
                let mut map = serde_json::Map::new();
                for (key, child) in children {
                    let name = match key {
                        Key::Int(v) => v.to_string(),
                        Key::Str(s) => s.clone(),
                    };
                    map.insert(name, child.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

/// Sparse read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// This node and everything beneath it.
    All,
    /// Only the listed children. Empty above leaf depth means "confirm
    /// this branch exists" without fetching it.
    Keys(BTreeMap<Key, Request>),
}

impl Default for Request {
    fn default() -> Self {
        Request::keys()
    }
}

impl Request {
    pub fn keys() -> Self {
        Request::Keys(BTreeMap::new())
    }

    /// Builder: request `child` under `key`.
    pub fn with(mut self, key: impl Into<Key>, child: Request) -> Self {
        match &mut self {
            Request::Keys(children) => {
                children.insert(key.into(), child);
            }
            Request::All => {}
        }
        self
    }

    /// Request tree equivalent to a list of walks ("matrix" requests).
    /// Each walk asks for everything beneath its end; an `All` subsumes
    /// any narrower walk under it.
    pub fn from_walks<W: AsRef<[Key]>>(walks: &[W]) -> Self {
        let mut root = Request::keys();
        for walk in walks {
            root.merge_walk(walk.as_ref());
        }
        root
    }

    fn merge_walk(&mut self, walk: &[Key]) {
        let Request::Keys(children) = self else {
            return;
        };
        match walk.split_first() {
            None => *self = Request::All,
            Some((first, rest)) => {
                if rest.is_empty() {
                    children.insert(first.clone(), Request::All);
                } else {
                    children
                        .entry(first.clone())
                        .or_insert_with(Request::keys)
                        .merge_walk(rest);
                }
            }
        }
    }
}

/// A flat record: the full (or partial) key walk plus, in data form, the
/// value. `value: None` is a key-only record; `Some(Value::Null)` is a
/// stored null.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub keys: Walk,
    pub value: Option<Value>,
}

impl Record {
    pub fn new(keys: Walk, value: impl Into<Value>) -> Self {
        Self {
            keys,
            value: Some(value.into()),
        }
    }

    pub fn keys_only(keys: Walk) -> Self {
        Self { keys, value: None }
    }
}
