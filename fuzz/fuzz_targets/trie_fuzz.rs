//! Fuzz test for the trie reducers
//!
//! Input bytes are read as JSON and turned into a trie (objects are
//! branches, the string `"*"` is a wildcard, anything else a value). The
//! reducers must never panic and must keep their algebraic properties:
//! - clip is idempotent and leaves only branches
//! - unflatten inverts flatten on wildcard-free tries
//! - flattened records come out in walk order
//!
//! Run with: cargo +nightly fuzz run trie_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use lnstore_core::Key;
use lnstore_storage::{clip, flatten, flatten_leaves, unflatten, FlattenMode, Trie};
use serde_json::Value;

fn to_trie(value: Value, budget: &mut usize) -> Trie {
    if *budget == 0 {
        return Trie::branch();
    }
    *budget -= 1;
    match value {
        Value::Object(map) => Trie::Branch(
            map.into_iter()
                .map(|(k, v)| {
                    let key = k.parse::<i64>().map(Key::Int).unwrap_or(Key::Str(k));
                    (key, to_trie(v, budget))
                })
                .collect(),
        ),
        Value::String(s) if s == "*" => Trie::Wildcard,
        other => Trie::Value(other),
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(json) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let trie = to_trie(json, &mut 512);

    for depth in 1..=5 {
        if let Ok(clipped) = clip(&trie, depth) {
            assert!(!clipped.contains_wildcard());
            assert_eq!(clipped.leaf_count(), 0);
            assert_eq!(clip(&clipped, depth).ok(), Some(clipped.clone()));
        }
        let _ = flatten_leaves(&trie, &[], depth);
    }

    let control: Vec<_> = flatten(&trie, FlattenMode::Control)
        .into_iter()
        .map(|r| r.keys)
        .collect();
    assert!(control.windows(2).all(|w| w[0] <= w[1]));

    if !trie.contains_wildcard() && trie.is_branch() {
        let records = flatten(&trie, FlattenMode::Data);
        assert_eq!(unflatten(&records).ok(), Some(trie));
    }
});
