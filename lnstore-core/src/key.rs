//! Key components and walks.
//!
//! A walk is an ordered tuple of key components, most significant level
//! first. Full walks (length N) address one leaf; shorter walks address a
//! subtree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stored payload (`Level0`). May legitimately be `null`, `false` or `0`.
pub type Value = serde_json::Value;

/// Ordered tuple of key components, top level first.
pub type Walk = Vec<Key>;

/// Scalar type declared for a key level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Int,
    Str,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Int => f.write_str("int"),
            KeyType::Str => f.write_str("str"),
        }
    }
}

/// One key component.
///
/// Integers order before strings; within a type the natural order applies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// Runtime type of this component.
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Int(_) => KeyType::Int,
            Key::Str(_) => KeyType::Str,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(v) => Some(*v),
            Key::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            Key::Int(_) => None,
        }
    }

    /// JSON form of this component, used when naming record columns.
    pub fn to_json(&self) -> Value {
        match self {
            Key::Int(v) => Value::from(*v),
            Key::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v as i64)
    }
}

impl From<u32> for Key {
    fn from(v: u32) -> Self {
        Key::Int(v as i64)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Str(v)
    }
}

/// Render a walk as `a/b/c` for error messages and log fields.
pub fn format_walk(walk: &[Key]) -> String {
    if walk.is_empty() {
        return "<root>".to_string();
    }
    walk.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build a walk from anything convertible into keys.
///
/// ```ignore
/// let w = walk![1, "prefs", 7];
/// ```
#[macro_export]
macro_rules! walk {
    ($($k:expr),* $(,)?) => {
        vec![$($crate::Key::from($k)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_ints_before_strings() {
        let mut keys = vec![Key::from("b"), Key::from(10), Key::from("a"), Key::from(-3)];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::Int(-3), Key::Int(10), Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn test_format_walk() {
        assert_eq!(format_walk(&[]), "<root>");
        assert_eq!(format_walk(&walk![1, "x", 3]), "1/\"x\"/3");
    }

    #[test]
    fn test_untagged_serde() {
        let json = serde_json::to_string(&walk![7, "k"]).unwrap();
        assert_eq!(json, "[7,\"k\"]");
        let back: Walk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, walk![7, "k"]);
    }
}
